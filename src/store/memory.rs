//! In-memory implementations of the collaborator traits.
//!
//! `MemoryLocalStore` doubles as the test fixture and as a usable backend
//! for embedders that keep their note set small. `MemoryRemoteStore`
//! simulates a blob provider with per-object modification times and
//! injectable failures so pass-level error handling can be exercised.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{RemoteError, StoreError};
use crate::types::{now_ms, Note, NoteId, Notebook, Stroke, TimestampMs};

use super::traits::{LocalStore, RemoteObject, RemoteStore};

// ============================================================================
// MemoryLocalStore
// ============================================================================

#[derive(Default)]
struct LocalState {
    notes: HashMap<NoteId, Note>,
    strokes: HashMap<NoteId, Vec<Stroke>>,
    notebooks: HashMap<String, Notebook>,
    /// note id → notebook ids
    associations: HashMap<NoteId, Vec<String>>,
    last_sync_time: Option<TimestampMs>,
    next_notebook_id: u64,
}

/// HashMap-backed local store guarded by a single `parking_lot::Mutex`.
#[derive(Default)]
pub struct MemoryLocalStore {
    state: Mutex<LocalState>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a note with its strokes, bypassing sync. Test/embedder helper.
    pub fn insert_note(&self, note: Note, strokes: Vec<Stroke>) {
        let mut state = self.state.lock();
        state.strokes.insert(note.id.clone(), strokes);
        state.notes.insert(note.id.clone(), note);
    }

    pub fn remove_note(&self, id: &str) {
        let mut state = self.state.lock();
        state.notes.remove(id);
        state.strokes.remove(id);
        state.associations.remove(id);
    }

    pub fn note_count(&self) -> usize {
        self.state.lock().notes.len()
    }

    pub fn notebook_count(&self) -> usize {
        self.state.lock().notebooks.len()
    }
}

impl LocalStore for MemoryLocalStore {
    fn all_notes(&self) -> Result<Vec<Note>, StoreError> {
        Ok(self.state.lock().notes.values().cloned().collect())
    }

    fn note(&self, id: &str) -> Result<Option<Note>, StoreError> {
        Ok(self.state.lock().notes.get(id).cloned())
    }

    fn upsert_note(&self, note: &Note) -> Result<(), StoreError> {
        self.state
            .lock()
            .notes
            .insert(note.id.clone(), note.clone());
        Ok(())
    }

    fn strokes(&self, note_id: &str) -> Result<Vec<Stroke>, StoreError> {
        Ok(self
            .state
            .lock()
            .strokes
            .get(note_id)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_strokes(&self, note_id: &str, strokes: Vec<Stroke>) -> Result<(), StoreError> {
        self.state.lock().strokes.insert(note_id.to_string(), strokes);
        Ok(())
    }

    fn notebook_titles(&self, note_id: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        let ids = match state.associations.get(note_id) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|nb_id| state.notebooks.get(nb_id))
            .map(|nb| nb.title.clone())
            .collect())
    }

    fn get_or_create_notebook(&self, title: &str) -> Result<Notebook, StoreError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.notebooks.values().find(|nb| nb.title == title) {
            return Ok(existing.clone());
        }
        state.next_notebook_id += 1;
        let notebook = Notebook {
            id: format!("nb-{}", state.next_notebook_id),
            title: title.to_string(),
        };
        state
            .notebooks
            .insert(notebook.id.clone(), notebook.clone());
        Ok(notebook)
    }

    fn associate(&self, note_id: &str, notebook_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if !state.notebooks.contains_key(notebook_id) {
            return Err(StoreError::NotebookNotFound(notebook_id.to_string()));
        }
        let ids = state.associations.entry(note_id.to_string()).or_default();
        if !ids.iter().any(|existing| existing == notebook_id) {
            ids.push(notebook_id.to_string());
        }
        Ok(())
    }

    fn last_sync_time(&self) -> Result<Option<TimestampMs>, StoreError> {
        Ok(self.state.lock().last_sync_time)
    }

    fn set_last_sync_time(&self, ts: TimestampMs) -> Result<(), StoreError> {
        self.state.lock().last_sync_time = Some(ts);
        Ok(())
    }
}

// ============================================================================
// MemoryRemoteStore
// ============================================================================

struct RemoteFile {
    name: String,
    bytes: Vec<u8>,
    modified_at: TimestampMs,
}

#[derive(Default)]
struct RemoteState {
    /// file id → file
    files: HashMap<String, RemoteFile>,
    next_file_id: u64,
    /// Object names whose download should fail, for error-path tests.
    poisoned: Vec<String>,
    /// When set, every call fails, simulating total connectivity loss.
    offline: bool,
}

/// Blob-provider simulation with listing by modification time.
pub struct MemoryRemoteStore {
    state: Mutex<RemoteState>,
    credentials: std::sync::atomic::AtomicBool,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            credentials: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn set_credentials(&self, present: bool) {
        self.credentials
            .store(present, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make every subsequent call fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Make downloads of the named object fail.
    pub fn poison(&self, name: &str) {
        self.state.lock().poisoned.push(name.to_string());
    }

    /// Put an object directly, stamping `modified_at`. Simulates another
    /// device having uploaded.
    pub fn seed_file(&self, name: &str, bytes: Vec<u8>, modified_at: TimestampMs) -> String {
        let mut state = self.state.lock();
        state.next_file_id += 1;
        let file_id = format!("f-{}", state.next_file_id);
        state.files.insert(
            file_id.clone(),
            RemoteFile {
                name: name.to_string(),
                bytes,
                modified_at,
            },
        );
        file_id
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .files
            .values()
            .find(|f| f.name == name)
            .map(|f| f.bytes.clone())
    }

    fn check_online(state: &RemoteState) -> Result<(), RemoteError> {
        if state.offline {
            Err(RemoteError::Network("connection lost".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn has_credentials(&self) -> bool {
        self.credentials.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn list_changed_since(
        &self,
        since: TimestampMs,
    ) -> Result<Vec<RemoteObject>, RemoteError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        let mut out: Vec<RemoteObject> = state
            .files
            .iter()
            .filter(|(_, f)| f.modified_at > since)
            .map(|(id, f)| RemoteObject {
                file_id: id.clone(),
                name: f.name.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        let file = state
            .files
            .get(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;
        if state.poisoned.iter().any(|n| *n == file.name) {
            return Err(RemoteError::Network(format!(
                "download interrupted: {}",
                file.name
            )));
        }
        Ok(file.bytes.clone())
    }

    async fn create_file(&self, name: &str, bytes: Vec<u8>) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.next_file_id += 1;
        let file_id = format!("f-{}", state.next_file_id);
        state.files.insert(
            file_id.clone(),
            RemoteFile {
                name: name.to_string(),
                bytes,
                modified_at: now_ms(),
            },
        );
        Ok(file_id)
    }

    async fn update_file(&self, file_id: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;
        file.bytes = bytes;
        file.modified_at = now_ms();
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state
            .files
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, f)| RemoteObject {
                file_id: id.clone(),
                name: f.name.clone(),
            }))
    }
}
