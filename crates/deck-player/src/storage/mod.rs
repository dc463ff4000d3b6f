//! Storage collaborators: audio blobs, queue persistence and the track catalog.
//!
//! Each concern is a trait with a filesystem implementation for the CLI and an
//! in-memory one for embedding and tests.

mod blob_store;
mod catalog;
mod queue_persistence;

use thiserror::Error;

pub use blob_store::{AudioBlobStore, DirBlobStore, MemoryBlobStore};
pub use catalog::{MemoryCatalog, TrackCatalog};
pub use queue_persistence::{JsonQueueFile, MemoryQueuePersistence, QueuePersistence};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {key}")]
    NotFound { key: String },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage format error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// File-name-safe form of a storage key.
pub(crate) fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
