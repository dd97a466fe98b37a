//! Remote wire format: one JSON envelope per note, plus the file naming
//! convention that distinguishes note files from foreign objects.
//!
//! Envelope JSON:
//! `{ "note": {...}, "strokes": [...], "notebooks": ["Work", "Ideas"] }`
//! The notebook titles make the remote representation self-describing, so a
//! fresh device can rebuild groupings without any side channel.

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::types::{Note, Stroke};

/// Suffix that marks an object as a note file.
pub const NOTE_FILE_SUFFIX: &str = ".note.json";

/// Name of the single remote metadata object.
pub const METADATA_FILE_NAME: &str = "sync-metadata.json";

/// The serialized form of one note and everything needed to restore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEnvelope {
    pub note: Note,
    pub strokes: Vec<Stroke>,
    /// Titles of every notebook the note belongs to. May be empty.
    pub notebooks: Vec<String>,
}

/// `{note_id}.note.json`
pub fn note_file_name(note_id: &str) -> String {
    format!("{note_id}{NOTE_FILE_SUFFIX}")
}

/// Extract the note id from an object name, or `None` for foreign objects.
/// Foreign objects are never fetched or parsed.
pub fn parse_note_file_name(name: &str) -> Option<&str> {
    let id = name.strip_suffix(NOTE_FILE_SUFFIX)?;
    if id.is_empty() {
        return None;
    }
    Some(id)
}

pub fn encode(envelope: &NoteEnvelope) -> Result<Vec<u8>, EnvelopeError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode a downloaded note file. `name` is carried for diagnostics; a
/// decode failure is a per-item error, not a pass failure.
pub fn decode(name: &str, bytes: &[u8]) -> Result<NoteEnvelope, EnvelopeError> {
    serde_json::from_slice(bytes).map_err(|source| EnvelopeError::Malformed {
        name: name.to_string(),
        source,
    })
}
