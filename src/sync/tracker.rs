//! ChangeTracker: the in-memory dirty set.
//!
//! Every local mutation must call [`ChangeTracker::register_changed`]
//! synchronously; the tracker is the upload phase's source of truth for
//! "what must be pushed". It is a best-effort cache, not a durable log:
//! a process restart loses pending marks (known limitation, recorded in
//! DESIGN.md). Registration is commutative and idempotent (last-write
//! timestamp wins, no ordering dependency), so editor threads may race an
//! in-flight upload freely; anything registered after a note's batch was
//! read is simply picked up by the next pass.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::traits::LocalStore;
use crate::types::{now_ms, Note, NoteId, TimestampMs};

pub struct ChangeTracker {
    local: Arc<dyn LocalStore>,
    /// note id → timestamp of the most recent registration
    dirty: Mutex<HashMap<NoteId, TimestampMs>>,
}

impl ChangeTracker {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self {
            local,
            dirty: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `note_id` was mutated "now". Safe from any thread.
    pub fn register_changed(&self, note_id: &str) {
        self.dirty.lock().insert(note_id.to_string(), now_ms());
    }

    /// Current snapshots of every tracked note whose `updated_at` is after
    /// `since`. Ids whose note no longer exists locally are skipped.
    pub fn changed_since(&self, since: TimestampMs) -> Result<Vec<Note>, StoreError> {
        let ids: Vec<NoteId> = self.dirty.lock().keys().cloned().collect();
        let mut changed = Vec::new();
        for id in ids {
            if let Some(note) = self.local.note(&id)? {
                if note.updated_at > since {
                    changed.push(note);
                }
            }
        }
        changed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(changed)
    }

    /// Forget only the given ids, the subset a pass confirmed uploaded.
    /// Marks registered after the upload snapshot was taken survive because
    /// `register_changed` re-inserts under the same key with a newer stamp
    /// and removal is by key, touching nothing else.
    pub fn clear_synced(&self, note_ids: &[NoteId]) {
        let mut dirty = self.dirty.lock();
        for id in note_ids {
            dirty.remove(id);
        }
    }

    /// Wholesale reset. Only valid after a confirmed-successful upload of
    /// the entire tracked set.
    pub fn clear(&self) {
        self.dirty.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.dirty.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.lock().is_empty()
    }

    pub fn is_dirty(&self, note_id: &str) -> bool {
        self.dirty.lock().contains_key(note_id)
    }
}
