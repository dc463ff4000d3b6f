//! Playback engine for rehearsal audio.
//!
//! Loads a whole track into memory, plays it through a time-stretching
//! transport so tempo changes keep pitch, and reports transport events to
//! subscribers.

pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod output;
pub mod playback;
pub mod resample;
pub mod stretch;
pub mod transport;

pub use config::EngineConfig;
pub use decode::{DecodedAudio, decode_audio};
pub use engine::AudioEngine;
pub use error::EngineError;
pub use events::EngineEvent;
pub use output::{CpalOutput, OfflineOutput, OutputBackend, OutputContext};
pub use transport::Envelope;
