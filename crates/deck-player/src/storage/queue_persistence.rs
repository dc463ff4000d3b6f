use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use deck_types::PersistedQueueState;

use super::StorageError;

/// Durable home of the play queue.
pub trait QueuePersistence: Send + Sync {
    /// Last saved state, or an empty queue when nothing was saved yet.
    fn load_queue_state(&self) -> Result<PersistedQueueState, StorageError>;
    fn save_queue_state(&self, state: &PersistedQueueState) -> Result<(), StorageError>;
}

/// Queue stored as pretty JSON, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct JsonQueueFile {
    path: PathBuf,
}

impl JsonQueueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QueuePersistence for JsonQueueFile {
    fn load_queue_state(&self) -> Result<PersistedQueueState, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(PersistedQueueState {
                autoplay: true,
                ..PersistedQueueState::default()
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn save_queue_state(&self, state: &PersistedQueueState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory persistence that can be told to fail, for exercising error paths.
#[derive(Default)]
pub struct MemoryQueuePersistence {
    state: Mutex<Option<PersistedQueueState>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryQueuePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedQueueState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn last_saved(&self) -> Option<PersistedQueueState> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

impl QueuePersistence for MemoryQueuePersistence {
    fn load_queue_state(&self) -> Result<PersistedQueueState, StorageError> {
        Ok(self.last_saved().unwrap_or(PersistedQueueState {
            autoplay: true,
            ..PersistedQueueState::default()
        }))
    }

    fn save_queue_state(&self, state: &PersistedQueueState) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("queue storage is read-only".to_string()));
        }
        if let Ok(mut slot) = self.state.lock() {
            *slot = Some(state.clone());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_types::QueueEntry;

    #[test]
    fn json_file_roundtrips_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonQueueFile::new(dir.path().join("nested").join("queue.json"));
        let state = PersistedQueueState {
            entries: vec![QueueEntry {
                id: "e1".to_string(),
                track_id: "t1".to_string(),
                added_at_ms: 5,
            }],
            current_index: Some(0),
            autoplay: false,
            saved_at_ms: 10,
        };
        file.save_queue_state(&state).unwrap();
        assert_eq!(file.load_queue_state().unwrap(), state);
    }

    #[test]
    fn missing_file_loads_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonQueueFile::new(dir.path().join("queue.json"));
        let state = file.load_queue_state().unwrap();
        assert!(state.entries.is_empty());
        assert_eq!(state.current_index, None);
        assert!(state.autoplay);
    }

    #[test]
    fn corrupt_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonQueueFile::new(path).load_queue_state().unwrap_err();
        assert!(matches!(err, StorageError::Serde(_)));
    }
}
