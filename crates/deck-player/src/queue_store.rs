//! Play queue: ordered entries, a current-index pointer and the autoplay flag.
//!
//! Every mutation persists the full snapshot through [`QueuePersistence`].
//! Persistence failures are logged and never roll back the in-memory change.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use deck_types::{PersistedQueueState, QueueEntry, QueueEntryId, TrackId};

use crate::error::QueueIndexError;
use crate::feed::ChangeFeed;
use crate::storage::{QueuePersistence, TrackCatalog};

/// In-memory queue.
///
/// `current_index` is `None` only for a cleared or never-populated queue, and
/// otherwise always points inside `entries`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueState {
    pub entries: Vec<QueueEntry>,
    pub current_index: Option<usize>,
    pub autoplay: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            current_index: None,
            autoplay: true,
        }
    }
}

impl QueueState {
    pub fn current_entry(&self) -> Option<&QueueEntry> {
        self.current_index.and_then(|i| self.entries.get(i))
    }

    fn to_persisted(&self) -> PersistedQueueState {
        PersistedQueueState {
            entries: self.entries.clone(),
            current_index: self.current_index,
            autoplay: self.autoplay,
            saved_at_ms: now_ms(),
        }
    }

    /// Pull the index back into range after a mutation.
    fn repair_index(&mut self) {
        let len = self.entries.len();
        self.current_index = match self.current_index {
            _ if len == 0 => None,
            Some(i) if i >= len => {
                let err = QueueIndexError { index: i, len };
                tracing::error!(error = %err, "queue index out of range; repairing");
                Some(len - 1)
            }
            other => other,
        };
    }
}

/// Which operation produced a [`QueueChange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOp {
    Add,
    Remove,
    Clear,
    Reorder,
    Jump,
    Advance,
    Previous,
    Validate,
    Restore,
    Autoplay,
}

/// Published after every queue mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueChange {
    pub reason: QueueOp,
    /// Entry under the current index after the change.
    pub current: Option<QueueEntry>,
    pub len: usize,
}

/// Cheap cloneable handle to the shared queue.
#[derive(Clone)]
pub struct QueueStore {
    state: Arc<Mutex<QueueState>>,
    persistence: Arc<dyn QueuePersistence>,
    feed: ChangeFeed<QueueChange>,
}

impl QueueStore {
    pub fn new(persistence: Arc<dyn QueuePersistence>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            persistence,
            feed: ChangeFeed::default(),
        }
    }

    pub fn subscribe(&self) -> Receiver<QueueChange> {
        self.feed.subscribe()
    }

    pub fn snapshot(&self) -> QueueState {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_entry(&self) -> Option<QueueEntry> {
        self.lock().current_entry().cloned()
    }

    /// Entry after the current one, if any.
    pub fn next_entry(&self) -> Option<QueueEntry> {
        let state = self.lock();
        let next = state.current_index.map_or(0, |i| i + 1);
        state.entries.get(next).cloned()
    }

    pub fn is_autoplay_enabled(&self) -> bool {
        self.lock().autoplay
    }

    /// Append one entry; returns its id.
    pub fn add_to_queue(&self, track_id: impl Into<TrackId>) -> QueueEntryId {
        let entry = new_entry(track_id.into());
        let id = entry.id.clone();
        self.mutate(QueueOp::Add, |state| {
            state.entries.push(entry);
            if state.current_index.is_none() {
                state.current_index = Some(0);
            }
            true
        });
        id
    }

    /// Append several entries in order; returns their ids.
    pub fn add_multiple_to_queue<I, T>(&self, track_ids: I) -> Vec<QueueEntryId>
    where
        I: IntoIterator<Item = T>,
        T: Into<TrackId>,
    {
        let entries: Vec<QueueEntry> = track_ids.into_iter().map(|t| new_entry(t.into())).collect();
        let ids = entries.iter().map(|e| e.id.clone()).collect();
        self.mutate(QueueOp::Add, |state| {
            if entries.is_empty() {
                return false;
            }
            state.entries.extend(entries);
            if state.current_index.is_none() {
                state.current_index = Some(0);
            }
            true
        });
        ids
    }

    /// Remove one entry by id. Returns `false` if no entry has that id.
    pub fn remove_from_queue(&self, entry_id: &str) -> bool {
        self.mutate(QueueOp::Remove, |state| {
            match state.entries.iter().position(|e| e.id == entry_id) {
                Some(pos) => {
                    remove_at(state, pos);
                    true
                }
                None => false,
            }
        })
    }

    /// Remove every entry referring to `track_id`; returns how many were dropped.
    pub fn remove_from_queue_by_track_id(&self, track_id: &str) -> usize {
        let mut removed = 0usize;
        self.mutate(QueueOp::Remove, |state| {
            while let Some(pos) = state.entries.iter().position(|e| e.track_id == track_id) {
                remove_at(state, pos);
                removed += 1;
            }
            removed > 0
        });
        removed
    }

    pub fn clear_queue(&self) {
        self.mutate(QueueOp::Clear, |state| {
            state.entries.clear();
            state.current_index = None;
            true
        });
    }

    /// Move the entry at `from` to `to`. Returns `false` if either index is out of range.
    pub fn reorder_queue(&self, from: usize, to: usize) -> bool {
        self.mutate(QueueOp::Reorder, |state| {
            let len = state.entries.len();
            if from >= len || to >= len || from == to {
                return false;
            }
            let entry = state.entries.remove(from);
            state.entries.insert(to, entry);
            state.current_index = state.current_index.map(|c| reordered_index(c, from, to));
            true
        })
    }

    /// Make `index` current, discarding every entry before it.
    pub fn jump_to_index(&self, index: usize) -> bool {
        self.mutate(QueueOp::Jump, |state| {
            if index >= state.entries.len() {
                return false;
            }
            state.entries.drain(..index);
            state.current_index = Some(0);
            true
        })
    }

    /// Step to the next entry when autoplay allows it.
    pub fn advance_queue(&self) -> bool {
        self.mutate(QueueOp::Advance, |state| {
            if !state.autoplay || state.entries.is_empty() {
                return false;
            }
            match state.current_index {
                None => state.current_index = Some(0),
                Some(i) if i + 1 < state.entries.len() => state.current_index = Some(i + 1),
                Some(_) => return false,
            }
            true
        })
    }

    pub fn go_to_previous(&self) -> bool {
        self.mutate(QueueOp::Previous, |state| match state.current_index {
            Some(i) if i > 0 => {
                state.current_index = Some(i - 1);
                true
            }
            _ => false,
        })
    }

    pub fn set_autoplay(&self, enabled: bool) {
        self.mutate(QueueOp::Autoplay, |state| {
            if state.autoplay == enabled {
                return false;
            }
            state.autoplay = enabled;
            true
        });
    }

    /// Drop entries whose track no longer exists in `catalog`; returns how many went.
    pub fn validate_queue(&self, catalog: &dyn TrackCatalog) -> usize {
        // Catalog lookups happen without holding the queue lock.
        let track_ids: Vec<TrackId> = self.lock().entries.iter().map(|e| e.track_id.clone()).collect();
        let mut orphans: Vec<TrackId> = Vec::new();
        for track_id in track_ids {
            if !orphans.contains(&track_id) && catalog.get_track(&track_id).is_none() {
                orphans.push(track_id);
            }
        }
        if orphans.is_empty() {
            return 0;
        }

        let mut removed = 0usize;
        self.mutate(QueueOp::Validate, |state| {
            let mut current = state.current_index;
            let mut kept = Vec::with_capacity(state.entries.len());
            for (pos, entry) in state.entries.drain(..).enumerate() {
                if orphans.contains(&entry.track_id) {
                    if let Some(c) = current {
                        if pos < c {
                            current = Some(c - 1);
                        }
                    }
                    removed += 1;
                } else {
                    kept.push(entry);
                }
            }
            state.entries = kept;
            state.current_index = match current {
                _ if state.entries.is_empty() => None,
                Some(c) => Some(c.min(state.entries.len() - 1)),
                None => None,
            };
            removed > 0
        });
        if removed > 0 {
            tracing::info!(removed, "dropped queue entries for deleted tracks");
        }
        removed
    }

    /// Replace the in-memory queue with the persisted one. Nothing is written back.
    pub fn load_persisted_queue(&self) -> Result<(), crate::storage::StorageError> {
        let persisted = self.persistence.load_queue_state()?;
        let mut state = self.lock();
        state.entries = persisted.entries;
        state.autoplay = persisted.autoplay;
        state.current_index = match persisted.current_index {
            None if !state.entries.is_empty() => Some(0),
            other => other,
        };
        state.repair_index();
        tracing::info!(
            entries = state.entries.len(),
            current = ?state.current_index,
            "queue restored"
        );
        self.feed.publish(change(QueueOp::Restore, &state));
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f`; when it reports a change, repair the index, persist and publish.
    ///
    /// Publishing happens under the state lock so listeners see changes in
    /// mutation order.
    fn mutate(&self, op: QueueOp, f: impl FnOnce(&mut QueueState) -> bool) -> bool {
        let mut state = self.lock();
        if !f(&mut *state) {
            return false;
        }
        state.repair_index();
        if let Err(e) = self.persistence.save_queue_state(&state.to_persisted()) {
            tracing::warn!(op = ?op, error = %e, "failed to persist queue");
        }
        self.feed.publish(change(op, &state));
        true
    }
}

fn change(reason: QueueOp, state: &QueueState) -> QueueChange {
    QueueChange {
        reason,
        current: state.current_entry().cloned(),
        len: state.entries.len(),
    }
}

fn new_entry(track_id: TrackId) -> QueueEntry {
    QueueEntry {
        id: uuid::Uuid::new_v4().to_string(),
        track_id,
        added_at_ms: now_ms(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Remove `pos`, keeping the pointer on the same entry, or on the same slot
/// when the current entry itself goes.
fn remove_at(state: &mut QueueState, pos: usize) {
    state.entries.remove(pos);
    let len = state.entries.len();
    state.current_index = match state.current_index {
        _ if len == 0 => None,
        Some(c) if pos < c => Some(c - 1),
        Some(c) => Some(c.min(len - 1)),
        None => None,
    };
}

/// Current index after moving the entry at `from` to `to`.
fn reordered_index(current: usize, from: usize, to: usize) -> usize {
    if from == current {
        to
    } else if from < current && to >= current {
        current - 1
    } else if from > current && to <= current {
        current + 1
    } else {
        current
    }
}
