//! Core data model shared across the engine.
//!
//! Notes are owned by the local store and mutated outside this crate; the
//! sync engine reads them, uploads them, and overwrites them with remote
//! copies. A note's `updated_at` is the proxy for "did its content change";
//! strokes are not separately versioned.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Client-generated, globally unique note identifier (UUID text).
pub type NoteId = String;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Note
// ============================================================================

/// A user document. `updated_at` is bumped by the repository layer on every
/// content mutation; `created_at` never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
    pub width: f64,
    pub height: f64,
}

// ============================================================================
// Stroke
// ============================================================================

/// One sampled point of a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

/// A single pen stroke. Belongs to exactly one note and is fetched and
/// persisted as a batch alongside it during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    /// Packed ARGB color.
    pub color: u32,
    pub width: f32,
    pub points: Vec<StrokePoint>,
}

// ============================================================================
// Notebook
// ============================================================================

/// A named grouping of notes. The remote representation carries only titles,
/// so notebooks are recreated locally by title on download when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    pub title: String,
}
