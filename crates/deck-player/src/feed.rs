//! Typed change notifications.
//!
//! Stores publish field-level deltas through a [`ChangeFeed`]; each
//! subscriber owns an unbounded crossbeam receiver.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};

#[derive(Clone)]
pub struct ChangeFeed<T> {
    senders: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> ChangeFeed<T> {
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Deliver each change in order; disconnected subscribers are dropped.
    pub fn publish_all(&self, changes: Vec<T>) {
        if changes.is_empty() {
            return;
        }
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| changes.iter().all(|c| tx.send(c.clone()).is_ok()));
        }
    }

    pub fn publish(&self, change: T) {
        self.publish_all(vec![change]);
    }
}
