//! The sync ledger: a small per-note `{lastModified, lastSynced}` record
//! persisted as one remote object.
//!
//! The ledger is advisory. Conflict detection compares note timestamps
//! against the last successful pass time, never ledger entries, so a
//! missing or corrupt ledger degrades to "all notes unknown" with a warning
//! rather than failing the pass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::store::traits::RemoteStore;
use crate::types::{now_ms, Note, NoteId, TimestampMs};

use super::envelope::METADATA_FILE_NAME;

/// One ledger row. `last_synced` is only advanced after a successful upload
/// of that exact `last_modified` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: NoteId,
    pub last_modified: TimestampMs,
    pub last_synced: TimestampMs,
}

/// The full ledger, serialized as `{ "entries": { id: {...} } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncLedger {
    pub entries: HashMap<NoteId, LedgerEntry>,
}

impl SyncLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the ledger object from the remote store. Absent or unparseable
    /// ledgers yield an empty one; corruption is never fatal.
    pub async fn load(remote: &dyn RemoteStore) -> Self {
        let object = match remote.find_by_name(METADATA_FILE_NAME).await {
            Ok(Some(object)) => object,
            Ok(None) => return Self::new(),
            Err(e) => {
                tracing::warn!("sync ledger lookup failed, starting empty: {e}");
                return Self::new();
            }
        };
        let bytes = match remote.download(&object.file_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("sync ledger download failed, starting empty: {e}");
                return Self::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!("sync ledger unparseable, starting empty: {e}");
                Self::new()
            }
        }
    }

    /// Upsert the entry for `note`, stamping its current `updated_at` and
    /// "now". Called once per successfully uploaded note.
    pub fn record_sync(&mut self, note: &Note) {
        self.entries.insert(
            note.id.clone(),
            LedgerEntry {
                id: note.id.clone(),
                last_modified: note.updated_at,
                last_synced: now_ms(),
            },
        );
    }

    /// Persist the ledger, creating the object on first save.
    pub async fn save(&self, remote: &dyn RemoteStore) -> Result<(), RemoteError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| RemoteError::Provider(format!("ledger serialization: {e}")))?;
        match remote.find_by_name(METADATA_FILE_NAME).await? {
            Some(object) => remote.update_file(&object.file_id, bytes).await,
            None => remote
                .create_file(METADATA_FILE_NAME, bytes)
                .await
                .map(|_| ()),
        }
    }

    pub fn entry(&self, note_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(note_id)
    }
}
