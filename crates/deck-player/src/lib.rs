//! Playback core for a rehearsal music player.
//!
//! Two stores hold what the user wants (the current track and transport
//! intent, and the play queue); the [`sync_bridge`] reconciles them with the
//! audio engine and the storage collaborators.

pub mod config;
pub mod error;
pub mod feed;
pub mod import;
pub mod intent_store;
pub mod queue_store;
pub mod storage;
pub mod sync_bridge;

pub use config::{BridgeConfig, PlayerConfig};
pub use error::LoadError;
pub use intent_store::{IntentChange, PlaybackIntent, PlaybackIntentStore};
pub use queue_store::{QueueChange, QueueState, QueueStore};
pub use sync_bridge::{BridgeHandle, SyncBridge};
