//! Reconciliation between the stores and the audio engine.
//!
//! The bridge is the only writer to the engine. It runs a single loop over
//! engine events, intent changes, queue changes and load completions, and
//! keeps the bookkeeping needed to tell user actions apart from echoes of its
//! own commands:
//! - `last_loaded_id` suppresses redundant track requests
//! - `last_forwarded_playing` turns play/pause intent into edges
//! - `pending_play` holds a play request until the track has loaded, and the
//!   play intent is read again when the engine reports `Loaded`
//! - a load token discards completions that lost to a newer request
//!
//! Fetch and decode run on short-lived worker threads so a slow load never
//! blocks event delivery.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select, unbounded};
use deck_engine::decode::decode_audio;
use deck_engine::resample::resample_to;
use deck_engine::{AudioEngine, DecodedAudio, EngineEvent, Envelope};
use deck_types::{QueueEntryId, Track, TrackId};

use crate::config::BridgeConfig;
use crate::error::LoadError;
use crate::intent_store::{IntentChange, PlaybackIntentStore};
use crate::queue_store::{QueueChange, QueueStore};
use crate::storage::{AudioBlobStore, TrackCatalog};

/// Result of one background fetch + decode.
struct LoadOutcome {
    token: u64,
    track: Track,
    result: Result<DecodedAudio, LoadError>,
}

pub struct SyncBridge {
    engine: AudioEngine,
    intent: PlaybackIntentStore,
    queue: QueueStore,
    blobs: Arc<dyn AudioBlobStore>,
    catalog: Arc<dyn TrackCatalog>,
    config: BridgeConfig,

    engine_rx: Receiver<EngineEvent>,
    intent_rx: Receiver<IntentChange>,
    queue_rx: Receiver<QueueChange>,
    load_tx: Sender<LoadOutcome>,
    load_rx: Receiver<LoadOutcome>,

    engine_initialized: bool,
    /// Track most recently handed to the loader.
    last_loaded_id: Option<TrackId>,
    load_token: u64,
    loads_in_flight: usize,
    /// Track whose load is currently outstanding.
    loading_track: Option<TrackId>,
    last_forwarded_playing: bool,
    pending_play: bool,
    /// User seek that arrived while the track was still loading.
    deferred_seek: Option<f64>,
    followed_entry: Option<QueueEntryId>,
    /// The current load was started by autoplay (or a skip after a failed one).
    autoplay_chain: bool,
    consecutive_skips: usize,
}

impl SyncBridge {
    /// Subscribe to all three sources. Nothing happens until [`start`](Self::start).
    pub fn new(
        engine: AudioEngine,
        intent: PlaybackIntentStore,
        queue: QueueStore,
        blobs: Arc<dyn AudioBlobStore>,
        catalog: Arc<dyn TrackCatalog>,
        config: BridgeConfig,
    ) -> Self {
        let (load_tx, load_rx) = unbounded();
        Self {
            engine_rx: engine.subscribe(),
            intent_rx: intent.subscribe(),
            queue_rx: queue.subscribe(),
            engine,
            intent,
            queue,
            blobs,
            catalog,
            config,
            load_tx,
            load_rx,
            engine_initialized: false,
            last_loaded_id: None,
            load_token: 0,
            loads_in_flight: 0,
            loading_track: None,
            last_forwarded_playing: false,
            pending_play: false,
            deferred_seek: None,
            followed_entry: None,
            autoplay_chain: false,
            consecutive_skips: 0,
        }
    }

    /// Initialize the engine (once), push the current tempo and volume, drop
    /// queue entries whose tracks are gone and follow the current entry.
    pub fn start(&mut self) {
        if !self.engine_initialized {
            match self.engine.initialize() {
                Ok(()) => {
                    self.engine_initialized = true;
                    let intent = self.intent.snapshot();
                    self.engine.set_speed(intent.tempo_multiplier);
                    self.engine.set_volume(intent.effective_volume());
                }
                Err(e) => {
                    tracing::error!(error = %e, "audio engine unavailable");
                    self.intent
                        .set_error(Some(format!("Failed to initialize audio engine: {e}")));
                }
            }
        }
        self.queue.validate_queue(self.catalog.as_ref());
        self.on_queue_changed();
    }

    /// Process whatever is queued right now and wait for outstanding loads.
    /// Returns once every channel is empty and no load is in flight.
    pub fn settle(&mut self) {
        self.settle_timeout(Duration::from_secs(30));
    }

    /// Like [`settle`](Self::settle) but gives up after `timeout`; returns
    /// whether the bridge went idle in time.
    pub fn settle_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.step() {
                continue;
            }
            if self.loads_in_flight == 0 {
                return true;
            }
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match self.load_rx.recv_timeout(left) {
                Ok(outcome) => self.on_load_outcome(outcome),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return true,
            }
        }
    }

    /// Handle at most one message from each source. Returns whether anything ran.
    fn step(&mut self) -> bool {
        let mut progressed = false;
        if let Ok(event) = self.engine_rx.try_recv() {
            self.on_engine_event(event);
            progressed = true;
        }
        if let Ok(change) = self.intent_rx.try_recv() {
            self.on_intent_change(change);
            progressed = true;
        }
        if self.queue_rx.try_recv().is_ok() {
            self.on_queue_changed();
            progressed = true;
        }
        if let Ok(outcome) = self.load_rx.try_recv() {
            self.on_load_outcome(outcome);
            progressed = true;
        }
        progressed
    }

    /// Run until `shutdown` fires or the engine goes away.
    pub fn run(&mut self, shutdown: Receiver<()>) {
        let engine_rx = self.engine_rx.clone();
        let intent_rx = self.intent_rx.clone();
        let queue_rx = self.queue_rx.clone();
        let load_rx = self.load_rx.clone();

        loop {
            let running = select! {
                recv(engine_rx) -> msg => match msg {
                    Ok(event) => {
                        self.on_engine_event(event);
                        true
                    }
                    Err(_) => {
                        tracing::info!("engine event stream closed; bridge stopping");
                        false
                    }
                },
                recv(intent_rx) -> msg => match msg {
                    Ok(change) => {
                        self.on_intent_change(change);
                        true
                    }
                    Err(_) => false,
                },
                recv(queue_rx) -> msg => match msg {
                    Ok(_) => {
                        self.on_queue_changed();
                        true
                    }
                    Err(_) => false,
                },
                recv(load_rx) -> msg => {
                    if let Ok(outcome) = msg {
                        self.on_load_outcome(outcome);
                    }
                    true
                },
                recv(shutdown) -> _ => false,
            };
            if !running {
                break;
            }
        }
        tracing::debug!("sync bridge detached");
    }

    /// Start the engine and run the loop on a background thread.
    pub fn spawn(mut self) -> std::io::Result<BridgeHandle> {
        let (shutdown_tx, shutdown_rx) = unbounded();
        let join = thread::Builder::new()
            .name("deck-bridge".to_string())
            .spawn(move || {
                self.start();
                self.run(shutdown_rx);
            })?;
        Ok(BridgeHandle {
            shutdown_tx,
            join: Some(join),
        })
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::TimeUpdate { time } => {
                let intent = self.intent.snapshot();
                // Reports about a track the intent has already moved away from.
                if intent.is_loading || intent.current_track_id() != self.last_loaded_id.as_deref() {
                    return;
                }
                self.intent.update_position(time);
            }
            EngineEvent::Loaded { duration } => self.on_loaded(duration),
            EngineEvent::Ended => {
                if self.is_stale_ended() {
                    tracing::debug!("ignoring end of a track the stores moved away from");
                    return;
                }
                self.on_ended();
            }
            EngineEvent::Error { cause } => {
                self.pending_play = false;
                self.intent.set_error(Some(cause));
            }
            EngineEvent::Play | EngineEvent::Pause => {
                let playing = event == EngineEvent::Play;
                if playing == self.last_forwarded_playing {
                    return;
                }
                tracing::debug!(playing, "engine changed transport on its own");
                self.last_forwarded_playing = playing;
                self.intent.set_is_playing(playing);
            }
        }
    }

    /// Re-check the play intent once the new track is in the engine and
    /// start it if the user still wants playback.
    fn on_loaded(&mut self, duration: f64) {
        let intent = self.intent.snapshot();
        if self.loading_track.is_some() || intent.current_track_id() != self.last_loaded_id.as_deref() {
            return;
        }
        self.intent.set_duration(duration);
        self.intent.set_is_loading(false);
        self.consecutive_skips = 0;
        self.autoplay_chain = false;

        self.pending_play = false;
        if self.intent.snapshot().is_playing && !self.last_forwarded_playing {
            self.engine_play();
        }
    }

    /// An `Ended` that was queued before the intent or the queue moved on.
    fn is_stale_ended(&self) -> bool {
        let intent = self.intent.snapshot();
        if intent.is_loading
            || self.loading_track.is_some()
            || intent.current_track_id() != self.last_loaded_id.as_deref()
        {
            return true;
        }
        self.queue.current_entry().map(|e| e.id) != self.followed_entry
    }

    fn on_ended(&mut self) {
        let ended_track = self.intent.snapshot().current_track;
        self.last_forwarded_playing = false;
        self.pending_play = false;
        self.intent.set_is_playing(false);

        if !self.queue.is_autoplay_enabled() {
            return;
        }
        if self.queue.advance_queue() {
            self.autoplay_chain = true;
            self.consecutive_skips = 0;
            let play = !ended_track.is_some_and(|t| t.pause_after);
            self.follow_current_entry(play);
        }
    }

    fn on_intent_change(&mut self, change: IntentChange) {
        match change {
            IntentChange::TrackRequested { track } => self.on_track_requested(track),
            IntentChange::TrackCleared => {
                self.last_loaded_id = None;
                self.loading_track = None;
                self.load_token = self.load_token.wrapping_add(1);
                self.pending_play = false;
                self.deferred_seek = None;
            }
            IntentChange::PlayingChanged { .. } => self.forward_play_state(),
            IntentChange::LoadingChanged { loading: false } if self.pending_play => {
                let intent = self.intent.snapshot();
                if self.loading_track.is_some() || intent.is_loading {
                    return;
                }
                self.pending_play = false;
                if intent.is_playing && intent.current_track.is_some() {
                    self.engine_play();
                }
            }
            IntentChange::LoadingChanged { .. } => {}
            IntentChange::PositionChanged { previous, current } => {
                if !is_user_seek(previous, current, self.config.seek_threshold_secs) {
                    return;
                }
                if self.loading_track.is_some() {
                    self.deferred_seek = Some(current);
                } else {
                    self.engine.seek(current);
                }
            }
            IntentChange::TempoChanged { multiplier } => self.engine.set_speed(multiplier),
            IntentChange::VolumeChanged { effective } => self.engine.set_volume(effective),
            IntentChange::DurationChanged { .. } | IntentChange::ErrorChanged { .. } => {}
        }
    }

    /// Forward an edge of the play intent, or park it while a load is running.
    fn forward_play_state(&mut self) {
        let intent = self.intent.snapshot();
        if !intent.is_playing {
            self.pending_play = false;
            if self.last_forwarded_playing {
                self.last_forwarded_playing = false;
                self.engine.pause();
            }
            return;
        }
        if self.last_forwarded_playing || intent.current_track.is_none() {
            return;
        }
        if intent.is_loading || self.loading_track.is_some() {
            self.pending_play = true;
            return;
        }
        self.engine_play();
    }

    fn engine_play(&mut self) {
        self.last_forwarded_playing = true;
        if let Err(e) = self.engine.play() {
            tracing::warn!(error = %e, "engine refused to play");
            self.last_forwarded_playing = false;
            self.intent.set_is_playing(false);
            self.intent.set_error(Some(e.to_string()));
        }
    }

    fn on_track_requested(&mut self, track: Track) {
        self.deferred_seek = None;
        if self.last_loaded_id.as_deref() == Some(track.id.as_str()) {
            if self.loading_track.as_deref() == Some(track.id.as_str()) {
                return;
            }
            tracing::debug!(track_id = %track.id, "track already loaded");
            self.intent.set_is_loading(false);
            return;
        }

        self.load_token = self.load_token.wrapping_add(1);
        self.last_loaded_id = Some(track.id.clone());
        self.loading_track = Some(track.id.clone());
        tracing::info!(track_id = %track.id, title = %track.title, "loading track");

        let token = self.load_token;
        let blobs = self.blobs.clone();
        let tx = self.load_tx.clone();
        let output_rate = self.engine.output_sample_rate();
        let chunk_frames = self.engine.config().resample_chunk_frames;
        let worker_track = track.clone();
        let spawned = thread::Builder::new()
            .name("deck-load".to_string())
            .spawn(move || {
                let result = fetch_and_decode(blobs.as_ref(), &worker_track, output_rate, chunk_frames);
                let _ = tx.send(LoadOutcome {
                    token,
                    track: worker_track,
                    result,
                });
            });
        match spawned {
            Ok(_) => self.loads_in_flight += 1,
            Err(e) => {
                self.loading_track = None;
                self.on_load_failed(&track, LoadError::Storage(format!("spawn loader: {e}")));
            }
        }
    }

    fn on_load_outcome(&mut self, outcome: LoadOutcome) {
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
        if outcome.token != self.load_token {
            tracing::debug!(track_id = %outcome.track.id, "discarding stale load");
            return;
        }
        self.loading_track = None;

        let track = outcome.track;
        let audio = match outcome.result {
            Ok(audio) => audio,
            Err(e) => return self.on_load_failed(&track, e),
        };
        // Replacing the track pauses the engine; that edge is not a user pause.
        self.last_forwarded_playing = false;
        if let Err(e) = self.engine.load_track(audio) {
            return self.on_load_failed(&track, e.into());
        }
        self.engine.set_envelope(Envelope::from_track(&track));

        let start = track.start_or_zero();
        let seek_to = self.deferred_seek.take().or((start > 0.0).then_some(start));
        if let Some(time) = seek_to {
            self.engine.seek(time);
        }
    }

    fn on_load_failed(&mut self, track: &Track, err: LoadError) {
        tracing::warn!(track_id = %track.id, error = %err, "track load failed");
        // Forget the id so requesting the same track again retries.
        self.last_loaded_id = None;
        self.pending_play = false;
        self.deferred_seek = None;
        self.intent.set_is_playing(false);
        self.intent.set_error(Some(err.to_string()));
        if self.autoplay_chain {
            self.skip_after_failure();
        }
    }

    /// Move past a broken track during autoplay, up to the skip cap.
    fn skip_after_failure(&mut self) {
        self.consecutive_skips += 1;
        let cap = self
            .config
            .max_consecutive_skips
            .unwrap_or_else(|| self.queue.len());
        if self.consecutive_skips > cap {
            let failed = self.consecutive_skips;
            tracing::error!(failed, "autoplay stopped: too many unplayable tracks");
            self.autoplay_chain = false;
            self.consecutive_skips = 0;
            self.intent.set_error(Some(format!(
                "Autoplay stopped after {failed} tracks failed to load"
            )));
            return;
        }
        if self.queue.advance_queue() {
            tracing::info!(attempt = self.consecutive_skips, "skipping unplayable track");
            self.follow_current_entry(true);
        } else {
            self.autoplay_chain = false;
        }
    }

    fn on_queue_changed(&mut self) {
        let current = self.queue.current_entry();
        if current.as_ref().map(|e| &e.id) == self.followed_entry.as_ref() {
            return;
        }
        self.autoplay_chain = false;
        match current {
            Some(_) => {
                let intent = self.intent.snapshot();
                self.follow_current_entry(intent.is_playing || self.pending_play);
            }
            None => {
                self.followed_entry = None;
                if self.intent.snapshot().current_track.is_some() {
                    self.intent.clear_track();
                }
            }
        }
    }

    /// Point the intent at the queue's current entry.
    fn follow_current_entry(&mut self, play: bool) {
        let Some(entry) = self.queue.current_entry() else {
            self.followed_entry = None;
            return;
        };
        self.followed_entry = Some(entry.id.clone());
        match self.catalog.get_track(&entry.track_id) {
            Some(track) => {
                self.intent.load_track(track);
                if play {
                    self.intent.play();
                }
            }
            None => {
                let err = LoadError::MissingTrack {
                    track_id: entry.track_id.clone(),
                };
                tracing::warn!(entry_id = %entry.id, error = %err, "queue entry has no track");
                self.intent.set_error(Some(err.to_string()));
                if self.autoplay_chain {
                    self.skip_after_failure();
                }
            }
        }
    }
}

fn fetch_and_decode(
    blobs: &dyn AudioBlobStore,
    track: &Track,
    output_rate: Option<u32>,
    chunk_frames: usize,
) -> Result<DecodedAudio, LoadError> {
    let bytes = blobs.get_audio_blob(&track.id)?;
    let audio = decode_audio(bytes, track.format_hint.as_deref())?;
    match output_rate {
        Some(rate) => Ok(resample_to(audio, rate, chunk_frames)?),
        None => Ok(audio),
    }
}

/// Position jumps above `threshold` are user seeks; smaller ones echo engine polls.
fn is_user_seek(previous: f64, current: f64, threshold: f64) -> bool {
    (current - previous).abs() > threshold
}

/// Handle to a bridge running on its own thread.
pub struct BridgeHandle {
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Stop the bridge and wait for it. The engine is left running; it belongs
    /// to whoever constructed it.
    pub fn detach(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::error!("sync bridge thread panicked");
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_position_moves_are_poll_echoes() {
        assert!(!is_user_seek(12.29, 12.34, 0.5));
        assert!(!is_user_seek(12.0, 12.5, 0.5));
        assert!(is_user_seek(12.34, 47.0, 0.5));
        assert!(is_user_seek(47.0, 3.0, 0.5));
    }

    #[test]
    fn missing_blob_maps_to_not_found() {
        let blobs = crate::storage::MemoryBlobStore::new();
        let err = fetch_and_decode(&blobs, &Track::new("t1", 1.0), None, 1024).unwrap_err();
        assert_eq!(
            err,
            LoadError::NotFound {
                track_id: "t1".to_string()
            }
        );
        assert_eq!(err.to_string(), "Audio file not found in storage: t1");
    }
}
