//! Engine event fan-out.
//!
//! Every subscriber gets its own unbounded crossbeam channel; dropped
//! receivers are pruned on the next publish.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Transport events reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Play,
    Pause,
    /// Playback reached the end of the track (or its end point).
    Ended,
    /// Position moved, in seconds on the track timeline.
    TimeUpdate { time: f64 },
    /// A track finished loading; `duration` is in seconds.
    Loaded { duration: f64 },
    /// A load or configure step failed.
    Error { cause: String },
}

#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<Sender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: EngineEvent) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Drop every subscriber; their receivers disconnect once drained.
    pub fn clear(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }
}
