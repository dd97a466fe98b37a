//! Sync-facing types: pass states and results, error events, network gating
//! policy, and the manager's construction options.

use std::sync::Arc;

use tokio::sync::watch;

use crate::store::traits::{LocalStore, RemoteStore};
use crate::types::NoteId;

use super::conflict::ConflictResolver;
use super::tracker::ChangeTracker;

// ============================================================================
// Pass state machine
// ============================================================================

/// Observable state of the sync manager.
///
/// `Idle → Connecting → Syncing → {Success | Error}` per pass; the manager
/// is reused, so `Success`/`Error` are terminal only for the pass, not the
/// object. `Conflict` is reserved for UI-surfaced resolution flows driven by
/// an [`FnResolver`](super::conflict::FnResolver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Connecting,
    Syncing,
    Conflict,
    Success,
    Error(String),
}

// ============================================================================
// Pass results
// ============================================================================

/// Which phase of a pass an error event occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Connect,
    Download,
    Upload,
}

/// A recoverable per-item failure, collected in [`SyncReport::errors`].
/// These never flip a pass to `Error` by themselves.
#[derive(Debug, Clone)]
pub struct SyncErrorEvent {
    pub phase: SyncPhase,
    pub note_id: Option<NoteId>,
    pub message: String,
}

/// Counters and diagnostics for one completed (or failed) pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Remote notes saved locally (new, remote-wins, or conflict-applied).
    pub downloaded: usize,
    /// Dirty notes pushed to the remote store.
    pub uploaded: usize,
    /// Conflicts the resolver was asked to settle.
    pub conflicts: usize,
    /// Per-item recoverable failures, diagnostic only.
    pub errors: Vec<SyncErrorEvent>,
}

/// Result of asking the manager for a pass.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The pass ran; terminal state is `Success` or `Error`, see the report
    /// and the state signal.
    Completed(SyncReport),
    /// Another pass was already in flight. No shared state was touched.
    Skipped,
}

impl SyncOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }
}

// ============================================================================
// Network gating
// ============================================================================

/// Connectivity class reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Offline,
    Cellular,
    /// Wi-Fi or other unmetered link.
    Unmetered,
}

/// User policy for when automatic sync may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    AnyConnection,
    UnmeteredOnly,
}

impl SyncPolicy {
    pub fn allows(&self, connectivity: Connectivity) -> bool {
        match (self, connectivity) {
            (_, Connectivity::Offline) => false,
            (SyncPolicy::AnyConnection, _) => true,
            (SyncPolicy::UnmeteredOnly, Connectivity::Unmetered) => true,
            (SyncPolicy::UnmeteredOnly, Connectivity::Cellular) => false,
        }
    }
}

/// Connectivity source. The watch channel always holds the current class;
/// subscribers see every transition.
pub trait NetworkGate: Send + Sync {
    fn watch(&self) -> watch::Receiver<Connectivity>;

    fn current(&self) -> Connectivity {
        *self.watch().borrow()
    }
}

/// A gate backed by a watch channel the embedder (or a test) drives.
pub struct StaticNetworkGate {
    tx: watch::Sender<Connectivity>,
    rx: watch::Receiver<Connectivity>,
}

impl StaticNetworkGate {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, rx) = watch::channel(initial);
        Self { tx, rx }
    }

    pub fn set(&self, connectivity: Connectivity) {
        // Send only fails with no receivers; we hold one ourselves.
        let _ = self.tx.send(connectivity);
    }
}

impl NetworkGate for StaticNetworkGate {
    fn watch(&self) -> watch::Receiver<Connectivity> {
        self.rx.clone()
    }
}

// ============================================================================
// Manager options
// ============================================================================

/// Everything a [`SyncManager`](super::SyncManager) needs, injected once at
/// construction. No ambient statics.
pub struct SyncManagerOptions {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub gate: Arc<dyn NetworkGate>,
    pub tracker: Arc<ChangeTracker>,
    pub resolver: Arc<dyn ConflictResolver>,
    pub policy: SyncPolicy,
}
