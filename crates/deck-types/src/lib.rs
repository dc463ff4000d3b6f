use serde::{Deserialize, Serialize};

/// Stable library identifier of a track.
pub type TrackId = String;

/// Identifier of one queue slot. The same track may occupy several slots.
pub type QueueEntryId = String;

/// Default fade-out length applied to newly imported tracks, in seconds.
pub const DEFAULT_FADE_OUT_SECS: f64 = 5.0;

/// Default tempo reference when a track carries no BPM tag.
pub const DEFAULT_BPM: f64 = 120.0;

/// Library track as seen by the playback core.
///
/// All times are in seconds. Optional trim points fall back to the start and
/// end of the decoded audio.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Track {
    /// Library id; also the key of the stored audio blob.
    pub id: TrackId,
    /// Display title.
    pub title: String,
    /// Display artist.
    pub artist: Option<String>,
    /// Album name, if tagged.
    pub album: Option<String>,
    /// Duration known to the library (may differ slightly from decoded length).
    pub duration_secs: f64,
    /// Native tempo of the recording.
    pub bpm: Option<f64>,
    /// Custom start point.
    pub start_time_secs: Option<f64>,
    /// Custom end point.
    pub end_time_secs: Option<f64>,
    /// Fade-in length applied from the start point.
    pub fade_in_secs: f64,
    /// Fade-out length applied before the end point.
    pub fade_out_secs: f64,
    /// Silence inserted before the first audible sample.
    pub start_delay_secs: f64,
    /// Stop after this track even when autoplay would continue.
    pub pause_after: bool,
    /// Container/codec hint for the decoder (for example `mp3`, `flac`).
    pub format_hint: Option<String>,
    /// Number of completed plays.
    pub play_count: u32,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: TrackId::new(),
            title: String::new(),
            artist: None,
            album: None,
            duration_secs: 0.0,
            bpm: None,
            start_time_secs: None,
            end_time_secs: None,
            fade_in_secs: 0.0,
            fade_out_secs: DEFAULT_FADE_OUT_SECS,
            start_delay_secs: 0.0,
            pause_after: false,
            format_hint: None,
            play_count: 0,
        }
    }
}

impl Track {
    /// Track with the given id and duration and default playback settings.
    pub fn new(id: impl Into<TrackId>, duration_secs: f64) -> Self {
        Self {
            id: id.into(),
            duration_secs,
            ..Self::default()
        }
    }

    /// Start point, or zero when none is set.
    pub fn start_or_zero(&self) -> f64 {
        self.start_time_secs.unwrap_or(0.0)
    }
}

/// One slot in the play queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    /// Unique per slot.
    pub id: QueueEntryId,
    /// Library track this slot refers to.
    pub track_id: TrackId,
    /// Insertion time, milliseconds since the Unix epoch.
    pub added_at_ms: u64,
}

/// Queue state as written to durable storage.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedQueueState {
    pub entries: Vec<QueueEntry>,
    /// Index into `entries`; `None` when the queue is empty or was never started.
    pub current_index: Option<usize>,
    /// Autoplay setting at save time.
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    /// Save time, milliseconds since the Unix epoch.
    pub saved_at_ms: u64,
}

fn default_autoplay() -> bool {
    true
}

/// Point-in-time view of the audio engine.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    pub is_initialized: bool,
    pub is_playing: bool,
    /// Position on the track timeline, in seconds.
    pub current_time: f64,
    /// Length of the loaded track; zero when nothing is loaded.
    pub duration: f64,
    /// Playback-rate multiplier.
    pub speed: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_defaults_match_library_defaults() {
        let track = Track::new("t1", 180.0);
        assert_eq!(track.fade_out_secs, DEFAULT_FADE_OUT_SECS);
        assert_eq!(track.fade_in_secs, 0.0);
        assert_eq!(track.start_or_zero(), 0.0);
        assert!(!track.pause_after);
    }

    #[test]
    fn track_deserializes_with_missing_fields() {
        let track: Track = serde_json::from_str(r#"{"id":"abc","title":"Song","bpm":96.0}"#)
            .expect("parse");
        assert_eq!(track.id, "abc");
        assert_eq!(track.bpm, Some(96.0));
        assert_eq!(track.fade_out_secs, DEFAULT_FADE_OUT_SECS);
        assert_eq!(track.end_time_secs, None);
    }

    #[test]
    fn persisted_queue_defaults_autoplay_on() {
        let state: PersistedQueueState =
            serde_json::from_str(r#"{"entries":[],"current_index":null,"saved_at_ms":1}"#)
                .expect("parse");
        assert!(state.autoplay);
        assert_eq!(state.current_index, None);
    }
}
