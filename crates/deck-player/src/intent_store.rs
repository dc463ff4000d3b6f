//! Playback intent store.
//!
//! Holds what the user wants to hear: the current track, play/pause intent,
//! position, tempo and volume. It never touches the engine; every mutation is
//! diffed against the previous state and published as typed [`IntentChange`]s
//! so observers react to edges rather than levels.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Receiver;
use deck_types::{DEFAULT_BPM, Track};

use crate::feed::ChangeFeed;

pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 2.0;

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackIntent {
    pub current_track: Option<Track>,
    /// Intent only; the engine may lag behind.
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    /// Native tempo of the current track.
    pub original_bpm: f64,
    /// `original_bpm * tempo_multiplier`, rounded.
    pub current_bpm: f64,
    pub tempo_multiplier: f64,
    pub volume: f64,
    pub is_muted: bool,
    pub effective_start: f64,
    pub effective_end: f64,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl Default for PlaybackIntent {
    fn default() -> Self {
        Self {
            current_track: None,
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            original_bpm: DEFAULT_BPM,
            current_bpm: DEFAULT_BPM,
            tempo_multiplier: 1.0,
            volume: 1.0,
            is_muted: false,
            effective_start: 0.0,
            effective_end: 0.0,
            is_loading: false,
            last_error: None,
        }
    }
}

impl PlaybackIntent {
    pub fn current_track_id(&self) -> Option<&str> {
        self.current_track.as_ref().map(|t| t.id.as_str())
    }

    /// Gain the engine should apply: zero while muted.
    pub fn effective_volume(&self) -> f64 {
        if self.is_muted { 0.0 } else { self.volume }
    }
}

/// Field-level delta published after a mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum IntentChange {
    /// `load_track` ran; sent even when the id matches the previous track.
    TrackRequested { track: Track },
    TrackCleared,
    PlayingChanged { playing: bool },
    PositionChanged { previous: f64, current: f64 },
    TempoChanged { multiplier: f64 },
    VolumeChanged { effective: f64 },
    LoadingChanged { loading: bool },
    DurationChanged { duration: f64 },
    ErrorChanged { error: Option<String> },
}

/// Shared handle; clones see the same state.
#[derive(Clone, Default)]
pub struct PlaybackIntentStore {
    inner: Arc<Mutex<PlaybackIntent>>,
    feed: ChangeFeed<IntentChange>,
}

impl PlaybackIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<IntentChange> {
        self.feed.subscribe()
    }

    pub fn snapshot(&self) -> PlaybackIntent {
        self.lock().clone()
    }

    /// Make `track` current: stopped, loading, at its start point, tempo reset.
    pub fn load_track(&self, track: Track) {
        let requested = track.clone();
        self.mutate(Some(IntentChange::TrackRequested { track: requested }), |s| {
            let duration = track.duration_secs.max(0.0);
            let start = track.start_or_zero().clamp(0.0, duration);
            let end = track
                .end_time_secs
                .unwrap_or(duration)
                .clamp(start, duration.max(start));
            let bpm = track.bpm.filter(|b| *b > 0.0).unwrap_or(DEFAULT_BPM);

            s.is_playing = false;
            s.current_time = start;
            s.duration = duration;
            s.original_bpm = bpm;
            s.current_bpm = bpm;
            s.tempo_multiplier = 1.0;
            s.effective_start = start;
            s.effective_end = end;
            s.is_loading = true;
            s.last_error = None;
            s.current_track = Some(track);
        });
    }

    /// Back to the empty intent. Volume and mute are kept.
    pub fn clear_track(&self) {
        self.mutate(Some(IntentChange::TrackCleared), |s| {
            *s = PlaybackIntent {
                volume: s.volume,
                is_muted: s.is_muted,
                ..PlaybackIntent::default()
            };
        });
    }

    pub fn play(&self) {
        self.set_is_playing(true);
    }

    pub fn pause(&self) {
        self.set_is_playing(false);
    }

    pub fn toggle_playback(&self) {
        self.mutate(None, |s| s.is_playing = !s.is_playing);
    }

    pub fn set_is_playing(&self, playing: bool) {
        self.mutate(None, |s| s.is_playing = playing);
    }

    /// User seek, clamped to the effective start/end of the current track.
    pub fn seek(&self, time: f64) {
        self.mutate(None, |s| {
            let t = if time.is_finite() { time } else { s.effective_start };
            s.current_time = t.clamp(s.effective_start, s.effective_end.max(s.effective_start));
        });
    }

    /// Position reported by the engine; not clamped.
    pub fn update_position(&self, time: f64) {
        if !time.is_finite() {
            return;
        }
        self.mutate(None, |s| s.current_time = time);
    }

    /// Tempo as a target BPM.
    pub fn set_tempo(&self, bpm: f64) {
        self.mutate(None, |s| {
            if bpm.is_finite() && bpm > 0.0 && s.original_bpm > 0.0 {
                apply_multiplier(s, bpm / s.original_bpm);
            }
        });
    }

    pub fn set_tempo_multiplier(&self, multiplier: f64) {
        self.mutate(None, |s| {
            if multiplier.is_finite() {
                apply_multiplier(s, multiplier);
            }
        });
    }

    pub fn reset_tempo(&self) {
        self.mutate(None, |s| {
            s.tempo_multiplier = 1.0;
            s.current_bpm = s.original_bpm;
        });
    }

    pub fn set_volume(&self, volume: f64) {
        if !volume.is_finite() {
            return;
        }
        self.mutate(None, |s| s.volume = volume.clamp(0.0, 1.0));
    }

    pub fn toggle_mute(&self) {
        self.mutate(None, |s| s.is_muted = !s.is_muted);
    }

    pub fn set_duration(&self, duration: f64) {
        self.mutate(None, |s| s.duration = duration.max(0.0));
    }

    pub fn set_is_loading(&self, loading: bool) {
        self.mutate(None, |s| s.is_loading = loading);
    }

    /// Record a failure; also ends any loading state.
    pub fn set_error(&self, error: Option<String>) {
        self.mutate(None, |s| {
            s.last_error = error;
            s.is_loading = false;
        });
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackIntent> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f`, then publish `lead` followed by the field deltas.
    ///
    /// Publishing happens under the state lock so concurrent writers cannot
    /// reorder their deltas.
    fn mutate(&self, lead: Option<IntentChange>, f: impl FnOnce(&mut PlaybackIntent)) {
        let mut state = self.lock();
        let before = state.clone();
        f(&mut *state);
        let mut changes: Vec<IntentChange> = lead.into_iter().collect();
        changes.extend(diff(&before, &state));
        self.feed.publish_all(changes);
    }
}

fn apply_multiplier(s: &mut PlaybackIntent, multiplier: f64) {
    let m = multiplier.clamp(MIN_TEMPO, MAX_TEMPO);
    s.tempo_multiplier = m;
    s.current_bpm = (s.original_bpm * m).round();
}

/// Field deltas between two states, in the order observers should apply them.
fn diff(before: &PlaybackIntent, after: &PlaybackIntent) -> Vec<IntentChange> {
    let mut out = Vec::new();
    if before.is_loading != after.is_loading {
        out.push(IntentChange::LoadingChanged {
            loading: after.is_loading,
        });
    }
    if before.is_playing != after.is_playing {
        out.push(IntentChange::PlayingChanged {
            playing: after.is_playing,
        });
    }
    if before.current_time != after.current_time {
        out.push(IntentChange::PositionChanged {
            previous: before.current_time,
            current: after.current_time,
        });
    }
    if before.tempo_multiplier != after.tempo_multiplier {
        out.push(IntentChange::TempoChanged {
            multiplier: after.tempo_multiplier,
        });
    }
    if before.effective_volume() != after.effective_volume() {
        out.push(IntentChange::VolumeChanged {
            effective: after.effective_volume(),
        });
    }
    if before.duration != after.duration {
        out.push(IntentChange::DurationChanged {
            duration: after.duration,
        });
    }
    if before.last_error != after.last_error {
        out.push(IntentChange::ErrorChanged {
            error: after.last_error.clone(),
        });
    }
    out
}
