use deck_engine::EngineError;
use thiserror::Error;

use crate::storage::StorageError;

/// Why a track could not be brought into the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    /// No audio stored for the track.
    #[error("Audio file not found in storage: {track_id}")]
    NotFound { track_id: String },
    /// The blob store failed for another reason.
    #[error("audio storage error: {0}")]
    Storage(String),
    /// Decode, resample or engine configure step failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The queue pointed at a track the library no longer has.
    #[error("track {track_id} is no longer in the library")]
    MissingTrack { track_id: String },
}

impl From<StorageError> for LoadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => LoadError::NotFound { track_id: key },
            other => LoadError::Storage(other.to_string()),
        }
    }
}

/// A queue index fell outside `-1..len`. Never expected; logged and repaired.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("queue index {index} out of range for {len} entries")]
pub struct QueueIndexError {
    pub index: usize,
    pub len: usize,
}
