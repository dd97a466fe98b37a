//! Collaborator traits: the local record store and the remote object store.
//!
//! The engine never owns persistence. The editor-facing repository and the
//! cloud provider client both live outside this crate and are injected as
//! trait objects; everything here is the narrow surface sync actually needs.

use async_trait::async_trait;

use crate::error::{RemoteError, StoreError};
use crate::types::{Note, Notebook, Stroke, TimestampMs};

// ============================================================================
// LocalStore
// ============================================================================

/// Narrow interface over the on-device record store.
///
/// All methods are synchronous; the local store is assumed to be fast
/// (embedded database or in-memory). Implementations must be safe to call
/// concurrently from the editor thread while a pass is in flight; the
/// engine tolerates reads racing with editor writes by design.
pub trait LocalStore: Send + Sync {
    fn all_notes(&self) -> Result<Vec<Note>, StoreError>;
    fn note(&self, id: &str) -> Result<Option<Note>, StoreError>;

    /// Insert or overwrite a note record. Used for remote-originated notes;
    /// the engine never deletes.
    fn upsert_note(&self, note: &Note) -> Result<(), StoreError>;

    fn strokes(&self, note_id: &str) -> Result<Vec<Stroke>, StoreError>;
    fn replace_strokes(&self, note_id: &str, strokes: Vec<Stroke>) -> Result<(), StoreError>;

    /// Titles of every notebook the note belongs to, for upload envelopes.
    fn notebook_titles(&self, note_id: &str) -> Result<Vec<String>, StoreError>;

    /// Find a notebook by title, creating it if absent. Downloads recreate
    /// notebooks from envelope titles through this.
    fn get_or_create_notebook(&self, title: &str) -> Result<Notebook, StoreError>;

    /// Associate a note with a notebook. Idempotent.
    fn associate(&self, note_id: &str, notebook_id: &str) -> Result<(), StoreError>;

    /// Timestamp of the last fully successful pass, `None` if never synced.
    fn last_sync_time(&self) -> Result<Option<TimestampMs>, StoreError>;
    fn set_last_sync_time(&self, ts: TimestampMs) -> Result<(), StoreError>;
}

// ============================================================================
// RemoteStore
// ============================================================================

/// A remote object as returned by listing or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Provider-assigned opaque file id.
    pub file_id: String,
    /// Display name; note files follow the naming convention in
    /// [`crate::sync::envelope`], anything else is foreign and skipped.
    pub name: String,
}

/// Narrow interface over the remote blob store (cloud drive, object bucket).
///
/// All methods are async and may take seconds on a poor link. Timeouts are
/// the implementation's concern and must surface as [`RemoteError`], never
/// as panics.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether credentials are present. Checked before a pass starts; a pass
    /// never begins without them.
    fn has_credentials(&self) -> bool;

    /// List objects whose remote modification time is after `since`.
    /// `since = 0` lists everything.
    async fn list_changed_since(&self, since: TimestampMs)
        -> Result<Vec<RemoteObject>, RemoteError>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError>;

    /// Create a new object, returning its provider file id.
    async fn create_file(&self, name: &str, bytes: Vec<u8>) -> Result<String, RemoteError>;

    /// Overwrite an existing object's content.
    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), RemoteError>;

    /// Locate an object by exact display name. Existence check used by the
    /// upload phase's create-or-update decision.
    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteObject>, RemoteError>;
}

/// Convenience alias used where traits are shared across threads and tasks.
pub type SharedLocalStore = std::sync::Arc<dyn LocalStore>;
pub type SharedRemoteStore = std::sync::Arc<dyn RemoteStore>;
