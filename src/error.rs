// src/error.rs
//
// Crate-wide error type.
//
// Only conditions the caller can act on are errors. Missing buffers,
// missing presets and degenerate notes are skipped and logged instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No audio clock could be created with the requested settings.
    #[error("audio subsystem unavailable: {0}")]
    AudioUnavailable(String),

    /// Tempo or time signature cannot be used for position conversion.
    #[error("invalid tempo: {bpm} bpm, {beats_per_measure} beats per measure")]
    InvalidTempo { bpm: f64, beats_per_measure: f64 },

    /// Offline render requested for a project without any regions.
    #[error("nothing to render: project timeline is empty")]
    EmptyTimeline,

    /// Project snapshot or config could not be decoded.
    #[error("failed to parse input: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
