//! SyncManager: orchestrates one full synchronization pass.
//!
//! A pass is download phase, then upload phase, then ledger update. Public
//! entry points never return `Err`: per-item failures are collected in the
//! pass report and pass-fatal failures land in the `Error` state, mirroring
//! the state signal. The single-flight guard is the load-bearing property
//! here; two interleaved passes would race on the dirty set, the ledger,
//! and the remote object set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{StoreError, SyncError};
use crate::observe::{Signal, SubscriberId};
use crate::store::traits::{LocalStore, RemoteObject, RemoteStore};
use crate::types::{now_ms, NoteId, TimestampMs};

use super::conflict::{duplicate_of, ConflictResolver, Resolution};
use super::envelope::{self, NoteEnvelope};
use super::metadata::SyncLedger;
use super::tracker::ChangeTracker;
use super::types::{
    NetworkGate, SyncErrorEvent, SyncManagerOptions, SyncOutcome, SyncPhase, SyncPolicy,
    SyncReport, SyncState,
};

/// Title given to the notebook that adopts downloaded notes when no remote
/// envelope named any notebook, so nothing becomes unreachable in the UI.
pub const FALLBACK_NOTEBOOK_TITLE: &str = "Imported";

// Progress bands. Coarse and advisory: connect, then downloads, then
// uploads, then 1.0. Monotonicity is enforced at the publish site.
const PROGRESS_CONNECTED: f32 = 0.05;
const PROGRESS_DOWNLOAD_END: f32 = 0.55;
const PROGRESS_UPLOAD_END: f32 = 0.95;

pub struct SyncManager {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    gate: Arc<dyn NetworkGate>,
    tracker: Arc<ChangeTracker>,
    resolver: Arc<dyn ConflictResolver>,
    policy: SyncPolicy,

    /// Single-flight guard. Checked-and-set atomically with the pass's
    /// first step; cleared unconditionally when the pass ends.
    in_flight: AtomicBool,
    state: Mutex<SyncState>,
    state_signal: Signal<SyncState>,
    progress: Mutex<f32>,
    progress_signal: Signal<f32>,
}

/// What one reconciled download contributed, for fallback-notebook and
/// report accounting.
struct DownloadedNote {
    note_id: NoteId,
    saved_locally: bool,
    named_notebooks: bool,
}

impl SyncManager {
    pub fn new(options: SyncManagerOptions) -> Self {
        Self {
            local: options.local,
            remote: options.remote,
            gate: options.gate,
            tracker: options.tracker,
            resolver: options.resolver,
            policy: options.policy,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(SyncState::Idle),
            state_signal: Signal::new(),
            progress: Mutex::new(0.0),
            progress_signal: Signal::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SyncState {
        self.state.lock().clone()
    }

    pub fn progress(&self) -> f32 {
        *self.progress.lock()
    }

    /// Subscribe to state transitions. Emitted in order; a pass is
    /// single-flight, so no interleaving is possible.
    pub fn on_state(&self, callback: impl Fn(&SyncState) + Send + Sync + 'static) -> SubscriberId {
        self.state_signal.subscribe(callback)
    }

    pub fn unsubscribe_state(&self, id: SubscriberId) {
        self.state_signal.unsubscribe(id);
    }

    /// Subscribe to progress. Monotonic in [0, 1] within a pass; advisory,
    /// not linearly time-accurate.
    pub fn on_progress(&self, callback: impl Fn(&f32) + Send + Sync + 'static) -> SubscriberId {
        self.progress_signal.subscribe(callback)
    }

    pub fn unsubscribe_progress(&self, id: SubscriberId) {
        self.progress_signal.unsubscribe(id);
    }

    pub fn change_tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock() = state.clone();
        self.state_signal.publish(&state);
    }

    /// Publish `value` if it advances the current pass's progress.
    fn publish_progress(&self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        let mut progress = self.progress.lock();
        if value > *progress {
            *progress = value;
            drop(progress);
            self.progress_signal.publish(&value);
        }
    }

    // -----------------------------------------------------------------------
    // Public entry point
    // -----------------------------------------------------------------------

    /// Run one pass. Returns [`SyncOutcome::Skipped`] immediately, with no
    /// shared-state mutation, if another pass is already in flight.
    pub async fn sync(&self) -> SyncOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SyncOutcome::Skipped;
        }

        let report = self.run_pass().await;

        // Cleared regardless of outcome so a future pass can run.
        self.in_flight.store(false, Ordering::SeqCst);
        SyncOutcome::Completed(report)
    }

    // -----------------------------------------------------------------------
    // Pass
    // -----------------------------------------------------------------------

    async fn run_pass(&self) -> SyncReport {
        *self.progress.lock() = 0.0;
        let mut report = SyncReport::default();

        self.set_state(SyncState::Connecting);

        // Policy errors abort before any mutation.
        let connectivity = self.gate.current();
        if !self.policy.allows(connectivity) {
            self.set_state(SyncState::Error(format!(
                "sync disallowed by network policy ({connectivity:?})"
            )));
            return report;
        }
        if !self.remote.has_credentials() {
            self.set_state(SyncState::Error(
                "not signed in to remote storage".to_string(),
            ));
            return report;
        }
        self.publish_progress(PROGRESS_CONNECTED);

        self.set_state(SyncState::Syncing);

        let last_sync = match self.local.last_sync_time() {
            Ok(ts) => ts.unwrap_or(0),
            Err(e) => {
                self.set_state(SyncState::Error(e.to_string()));
                return report;
            }
        };

        if let Err(fatal) = self.download_phase(last_sync, &mut report).await {
            self.set_state(SyncState::Error(fatal.to_string()));
            return report;
        }

        if let Err(fatal) = self.upload_phase(last_sync, &mut report).await {
            self.set_state(SyncState::Error(fatal.to_string()));
            return report;
        }

        // Advance the pass cursor only on full success; a preserved cursor
        // means nothing partially processed is treated as synced.
        if let Err(e) = self.local.set_last_sync_time(now_ms()) {
            self.set_state(SyncState::Error(e.to_string()));
            return report;
        }

        self.publish_progress(1.0);
        self.set_state(SyncState::Success);
        report
    }

    // -----------------------------------------------------------------------
    // Download phase
    // -----------------------------------------------------------------------

    async fn download_phase(
        &self,
        last_sync: TimestampMs,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        // Failing to enumerate remote changes at all leaves no safe way to
        // continue; pass-fatal.
        let mut listing = self
            .remote
            .list_changed_since(last_sync)
            .await
            .map_err(SyncError::ListingFailed)?;

        // Initial-sync bootstrap: a fresh install may carry a stale cursor
        // (e.g. restored preferences) while holding zero notes. Retry from
        // epoch before concluding there is nothing to download.
        if listing.is_empty() && last_sync > 0 {
            let local_is_empty = self.local.all_notes()?.is_empty();
            if local_is_empty {
                listing = self
                    .remote
                    .list_changed_since(0)
                    .await
                    .map_err(SyncError::ListingFailed)?;
            }
        }

        // Foreign objects are skipped, not errored.
        let candidates: Vec<RemoteObject> = listing
            .into_iter()
            .filter(|object| envelope::parse_note_file_name(&object.name).is_some())
            .collect();

        let total = candidates.len();
        let mut any_named_notebooks = false;
        let mut orphaned: Vec<NoteId> = Vec::new();

        for (index, object) in candidates.iter().enumerate() {
            match self.reconcile_remote_object(object, last_sync, report).await {
                Ok(downloaded) => {
                    if downloaded.named_notebooks {
                        any_named_notebooks = true;
                    }
                    if downloaded.saved_locally {
                        report.downloaded += 1;
                        if !downloaded.named_notebooks {
                            orphaned.push(downloaded.note_id);
                        }
                    }
                }
                Err(SyncError::Remote(e)) if e.is_fatal() => {
                    return Err(SyncError::Remote(e));
                }
                Err(e) => {
                    tracing::warn!("skipping remote note file {}: {e}", object.name);
                    report.errors.push(SyncErrorEvent {
                        phase: SyncPhase::Download,
                        note_id: envelope::parse_note_file_name(&object.name)
                            .map(|id| id.to_string()),
                        message: e.to_string(),
                    });
                }
            }

            let band = PROGRESS_DOWNLOAD_END - PROGRESS_CONNECTED;
            let fraction = (index + 1) as f32 / total as f32;
            self.publish_progress(PROGRESS_CONNECTED + band * fraction);
        }

        // No envelope named a notebook: adopt every downloaded note into a
        // fallback notebook so it stays reachable.
        if report.downloaded > 0 && !any_named_notebooks && !orphaned.is_empty() {
            let notebook = self.local.get_or_create_notebook(FALLBACK_NOTEBOOK_TITLE)?;
            for note_id in &orphaned {
                self.local.associate(note_id, &notebook.id)?;
            }
        }

        self.publish_progress(PROGRESS_DOWNLOAD_END);
        Ok(())
    }

    /// Fetch, parse, and reconcile one remote note file against local state.
    async fn reconcile_remote_object(
        &self,
        object: &RemoteObject,
        last_sync: TimestampMs,
        report: &mut SyncReport,
    ) -> Result<DownloadedNote, SyncError> {
        let bytes = self.remote.download(&object.file_id).await?;
        let remote_envelope = envelope::decode(&object.name, &bytes)?;
        let note_id = remote_envelope.note.id.clone();
        let named_notebooks = !remote_envelope.notebooks.is_empty();

        // The id of whatever record this download actually saved, for
        // KeepBoth it is the duplicate, not the conflicted original.
        let mut saved_id = note_id.clone();

        let local_note = self.local.note(&note_id)?;
        let saved_locally = match local_note {
            None => {
                // Remote-originated note, first sighting.
                self.apply_remote(&remote_envelope)?;
                true
            }
            Some(local_note) => {
                let remote_changed = remote_envelope.note.updated_at > last_sync;
                let local_changed = local_note.updated_at > last_sync;

                match (local_changed, remote_changed) {
                    (true, true) => {
                        report.conflicts += 1;
                        match self.resolver.resolve(&local_note, &remote_envelope.note) {
                            Resolution::UseRemote => {
                                self.apply_remote(&remote_envelope)?;
                                true
                            }
                            Resolution::UseLocal => {
                                // Keep local content; make sure it re-uploads
                                // and overwrites the remote next.
                                self.tracker.register_changed(&note_id);
                                false
                            }
                            Resolution::KeepBoth => {
                                saved_id = self.keep_both(&remote_envelope)?;
                                true
                            }
                        }
                    }
                    // Only the remote side moved: remote wins.
                    (false, true) => {
                        self.apply_remote(&remote_envelope)?;
                        true
                    }
                    // Only local moved (or neither): upload will overwrite.
                    _ => false,
                }
            }
        };

        Ok(DownloadedNote {
            note_id: saved_id,
            saved_locally,
            named_notebooks,
        })
    }

    /// Save a remote envelope into the local store: note record, stroke
    /// batch, and notebook associations (creating notebooks by title).
    fn apply_remote(&self, remote_envelope: &NoteEnvelope) -> Result<(), StoreError> {
        let note = &remote_envelope.note;
        self.local.upsert_note(note)?;
        self.local
            .replace_strokes(&note.id, remote_envelope.strokes.clone())?;
        for title in &remote_envelope.notebooks {
            let notebook = self.local.get_or_create_notebook(title)?;
            self.local.associate(&note.id, &notebook.id)?;
        }
        Ok(())
    }

    /// KeepBoth: duplicate the remote variant under a fresh id and leave the
    /// original local note untouched. The duplicate is marked dirty so it
    /// uploads as its own remote object. Returns the duplicate's id.
    fn keep_both(&self, remote_envelope: &NoteEnvelope) -> Result<NoteId, StoreError> {
        let duplicate = duplicate_of(&remote_envelope.note);
        self.local.upsert_note(&duplicate)?;
        self.local
            .replace_strokes(&duplicate.id, remote_envelope.strokes.clone())?;
        for title in &remote_envelope.notebooks {
            let notebook = self.local.get_or_create_notebook(title)?;
            self.local.associate(&duplicate.id, &notebook.id)?;
        }
        self.tracker.register_changed(&duplicate.id);
        // The conflicted local note stays dirty too and re-uploads.
        self.tracker.register_changed(&remote_envelope.note.id);
        Ok(duplicate.id)
    }

    // -----------------------------------------------------------------------
    // Upload phase
    // -----------------------------------------------------------------------

    async fn upload_phase(
        &self,
        last_sync: TimestampMs,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let dirty = self.tracker.changed_since(last_sync)?;
        let total = dirty.len();
        let mut ledger = SyncLedger::load(self.remote.as_ref()).await;
        let mut confirmed: Vec<NoteId> = Vec::new();

        for (index, note) in dirty.iter().enumerate() {
            match self.upload_note(note).await {
                Ok(()) => {
                    ledger.record_sync(note);
                    confirmed.push(note.id.clone());
                }
                Err(SyncError::Remote(e)) if e.is_fatal() => {
                    // Clear what already made it up before aborting, so
                    // those notes do not re-upload needlessly.
                    self.tracker.clear_synced(&confirmed);
                    return Err(SyncError::Remote(e));
                }
                Err(e) => {
                    // Stays in the dirty set for the next pass.
                    tracing::warn!("upload of note {} failed: {e}", note.id);
                    report.errors.push(SyncErrorEvent {
                        phase: SyncPhase::Upload,
                        note_id: Some(note.id.clone()),
                        message: e.to_string(),
                    });
                }
            }

            let band = PROGRESS_UPLOAD_END - PROGRESS_DOWNLOAD_END;
            let fraction = (index + 1) as f32 / total as f32;
            self.publish_progress(PROGRESS_DOWNLOAD_END + band * fraction);
        }

        report.uploaded = confirmed.len();

        // The ledger is advisory; a failed save is logged, not fatal.
        if !confirmed.is_empty() {
            if let Err(e) = ledger.save(self.remote.as_ref()).await {
                tracing::warn!("sync ledger save failed: {e}");
                report.errors.push(SyncErrorEvent {
                    phase: SyncPhase::Upload,
                    note_id: None,
                    message: format!("ledger save failed: {e}"),
                });
            }
        }

        // Only the confirmed subset leaves the dirty set. A mutation racing
        // this pass re-registers its id and is picked up next time.
        self.tracker.clear_synced(&confirmed);

        self.publish_progress(PROGRESS_UPLOAD_END);
        Ok(())
    }

    /// Serialize one note and create-or-update its remote object.
    async fn upload_note(&self, note: &crate::types::Note) -> Result<(), SyncError> {
        let strokes = self.local.strokes(&note.id)?;
        let notebooks = self.local.notebook_titles(&note.id)?;
        let bytes = envelope::encode(&NoteEnvelope {
            note: note.clone(),
            strokes,
            notebooks,
        })?;

        let name = envelope::note_file_name(&note.id);
        match self.remote.find_by_name(&name).await? {
            Some(existing) => self.remote.update_file(&existing.file_id, bytes).await?,
            None => {
                self.remote.create_file(&name, bytes).await?;
            }
        }
        Ok(())
    }
}
