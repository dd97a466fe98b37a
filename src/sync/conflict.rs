//! Conflict resolution for notes edited on both sides since the last pass.
//!
//! The resolver is a pure decision function: given the local and remote
//! snapshots it returns a verdict; the manager applies it. All three
//! verdicts are first-class; the manager carries no hidden preference for
//! either side, and the resolver is a required constructor input so a
//! silent default cannot creep in. UI layers that want to ask the user wrap
//! their prompt in an [`FnResolver`].

use uuid::Uuid;

use crate::types::{now_ms, Note};

/// Verdict for one conflicted note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local copy; it stays dirty and re-uploads, overwriting the
    /// remote on the next upload phase.
    UseLocal,
    /// Overwrite local content with the remote copy.
    UseRemote,
    /// Keep the local copy untouched and duplicate the remote copy into a
    /// new note with a fresh id, so neither edit is lost.
    KeepBoth,
}

/// Pure decision function invoked only for true concurrent edits, when both
/// `updated_at`s after the last successful pass.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, local: &Note, remote: &Note) -> Resolution;
}

/// Always keeps the local edit.
pub struct PreferLocal;

impl ConflictResolver for PreferLocal {
    fn resolve(&self, _local: &Note, _remote: &Note) -> Resolution {
        Resolution::UseLocal
    }
}

/// Always takes the remote edit.
pub struct PreferRemote;

impl ConflictResolver for PreferRemote {
    fn resolve(&self, _local: &Note, _remote: &Note) -> Resolution {
        Resolution::UseRemote
    }
}

/// Always duplicates, losing nothing.
pub struct DuplicateBoth;

impl ConflictResolver for DuplicateBoth {
    fn resolve(&self, _local: &Note, _remote: &Note) -> Resolution {
        Resolution::KeepBoth
    }
}

/// Adapter for closures, typically a UI prompt that blocks on the user.
pub struct FnResolver<F>(pub F);

impl<F> ConflictResolver for FnResolver<F>
where
    F: Fn(&Note, &Note) -> Resolution + Send + Sync,
{
    fn resolve(&self, local: &Note, remote: &Note) -> Resolution {
        (self.0)(local, remote)
    }
}

/// Title marker appended to a KeepBoth duplicate so the user can see where
/// the extra note came from.
pub const COPY_SUFFIX: &str = " (Copy)";

/// Build the KeepBoth duplicate: a new note carrying the remote content
/// under a freshly generated id. The caller copies the remote strokes in
/// alongside it; the original local note is left untouched.
pub fn duplicate_of(remote: &Note) -> Note {
    let stamp = now_ms();
    Note {
        id: Uuid::new_v4().to_string(),
        title: format!("{}{COPY_SUFFIX}", remote.title),
        created_at: stamp,
        updated_at: stamp,
        width: remote.width,
        height: remote.height,
    }
}
