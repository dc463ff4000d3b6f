use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{StorageError, sanitize_key};

/// Encoded audio keyed by track id.
pub trait AudioBlobStore: Send + Sync {
    /// Encoded bytes for `track_id`; [`StorageError::NotFound`] when absent.
    fn get_audio_blob(&self, track_id: &str) -> Result<Vec<u8>, StorageError>;
    fn save_audio_blob(&self, track_id: &str, bytes: &[u8]) -> Result<(), StorageError>;
    /// Deleting a missing blob is not an error.
    fn delete_audio_blob(&self, track_id: &str) -> Result<(), StorageError>;
}

/// One file per track under a directory.
#[derive(Clone, Debug)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, track_id: &str) -> PathBuf {
        self.root.join(format!("{}.audio", sanitize_key(track_id)))
    }
}

impl AudioBlobStore for DirBlobStore {
    fn get_audio_blob(&self, track_id: &str) -> Result<Vec<u8>, StorageError> {
        match std::fs::read(self.path_for(track_id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: track_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn save_audio_blob(&self, track_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        std::fs::write(self.path_for(track_id), bytes)?;
        Ok(())
    }

    fn delete_audio_blob(&self, track_id: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(track_id)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBlobStore for MemoryBlobStore {
    fn get_audio_blob(&self, track_id: &str) -> Result<Vec<u8>, StorageError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| StorageError::Unavailable("blob store lock poisoned".to_string()))?;
        blobs.get(track_id).cloned().ok_or_else(|| StorageError::NotFound {
            key: track_id.to_string(),
        })
    }

    fn save_audio_blob(&self, track_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(track_id.to_string(), bytes.to_vec());
        }
        Ok(())
    }

    fn delete_audio_blob(&self, track_id: &str) -> Result<(), StorageError> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.remove(track_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_store_roundtrips_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::open(dir.path().join("blobs")).unwrap();
        store.save_audio_blob("t-1", b"RIFF").unwrap();
        assert_eq!(store.get_audio_blob("t-1").unwrap(), b"RIFF");

        store.delete_audio_blob("t-1").unwrap();
        store.delete_audio_blob("t-1").unwrap();
        assert!(matches!(
            store.get_audio_blob("t-1"),
            Err(StorageError::NotFound { key }) if key == "t-1"
        ));
    }

    #[test]
    fn memory_store_reports_missing_blob() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get_audio_blob("nope"),
            Err(StorageError::NotFound { .. })
        ));
        store.save_audio_blob("a", &[1, 2, 3]).unwrap();
        assert_eq!(store.get_audio_blob("a").unwrap(), vec![1, 2, 3]);
    }
}
