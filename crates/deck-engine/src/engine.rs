//! Audio engine: the single owner of the output stream and the loaded track.
//!
//! [`AudioEngine`] is a cheap `Clone` handle meant to be constructed once by
//! the application root and handed to whoever drives it. Every command takes
//! the engine lock, updates the transport and publishes its event before
//! releasing it, so subscribers see events in command order and a position
//! poll can never interleave with a track change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use deck_types::EngineSnapshot;

use crate::config::EngineConfig;
use crate::decode::{self, DecodedAudio};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::output::{CpalOutput, OutputBackend, OutputContext};
use crate::resample;
use crate::transport::{Envelope, Schedule, SharedTransport, TransportNode};

/// Engine lifecycle. `Ended` accepts the same commands as `Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    /// Output is open but no track is loaded.
    Empty,
    Stopped,
    Playing,
    Ended,
}

#[derive(Clone)]
pub struct AudioEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    config: EngineConfig,
    backend: Box<dyn OutputBackend>,
    state: Mutex<EngineState>,
    events: EventBus,
}

struct EngineState {
    phase: EnginePhase,
    output: Option<Box<dyn OutputContext>>,
    transport: Option<SharedTransport>,
    duration: f64,
    /// Where playback counts as finished: the track end point, capped at `duration`.
    end_bound: f64,
    speed: f64,
    volume: f64,
    last_reported: f64,
    /// Bumped whenever polling stops; a poller exits once its generation is stale.
    poll_generation: u64,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            phase: EnginePhase::Uninitialized,
            output: None,
            transport: None,
            duration: 0.0,
            end_bound: 0.0,
            speed: 1.0,
            volume: 1.0,
            last_reported: 0.0,
            poll_generation: 0,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Tick {
    Ended,
    Report(f64),
    Quiet,
}

/// Decide what one poll observes. `Ended` wins over a position report.
fn evaluate_tick(position: f64, end_bound: f64, last_reported: f64, config: &EngineConfig) -> Tick {
    if position >= end_bound - config.end_epsilon_secs {
        Tick::Ended
    } else if (position - last_reported).abs() > config.min_report_delta_secs {
        Tick::Report(position)
    } else {
        Tick::Quiet
    }
}

impl AudioEngine {
    pub fn new(config: EngineConfig, backend: impl OutputBackend + 'static) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                backend: Box::new(backend),
                state: Mutex::new(EngineState::default()),
                events: EventBus::new(),
            }),
        }
    }

    /// Engine on a real output device; `device` is a name substring or `None` for the default.
    pub fn with_cpal(config: EngineConfig, device: Option<String>) -> Self {
        let backend = CpalOutput::new(device, config.preferred_sample_rate);
        Self::new(config, backend)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Open the output. A no-op when already initialized.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.phase != EnginePhase::Uninitialized {
            return Ok(());
        }

        let transport: SharedTransport = Arc::new(Mutex::new(TransportNode::new(
            self.shared.config.stretch_window_ms,
        )));
        let output = self.shared.backend.open(transport.clone()).inspect_err(|e| {
            tracing::error!(error = %e, "audio engine init failed");
        })?;
        {
            let mut node = lock_transport(&transport);
            node.prepare(output.sample_rate());
            node.set_gain(state.volume as f32);
        }

        tracing::info!(sample_rate = output.sample_rate(), "audio engine initialized");
        state.output = Some(output);
        state.transport = Some(transport);
        state.phase = EnginePhase::Empty;
        Ok(())
    }

    pub fn phase(&self) -> EnginePhase {
        self.shared.lock_state().phase
    }

    /// Rate tracks should be decoded to, once the output is open.
    pub fn output_sample_rate(&self) -> Option<u32> {
        let state = self.shared.lock_state();
        state
            .transport
            .as_ref()
            .map(|t| lock_transport(t).sample_rate())
    }

    /// Replace the loaded track, stopping current playback first.
    ///
    /// Audio at a different rate than the output is resampled here. Emits
    /// `Loaded` on success and `Error` on failure, never both.
    pub fn load_track(&self, audio: DecodedAudio) -> Result<()> {
        let mut state = self.shared.lock_state();
        let Some(transport) = state.transport.clone() else {
            return Err(self.shared.fail(EngineError::NotInitialized));
        };

        if state.phase == EnginePhase::Playing {
            self.shared.pause_locked(&mut state);
        }
        stop_polling(&mut state);

        let sample_rate = lock_transport(&transport).sample_rate();
        let audio = match resample::resample_to(audio, sample_rate, self.shared.config.resample_chunk_frames) {
            Ok(audio) if audio.samples.is_empty() => {
                Err(EngineError::Decode("track has no audio".to_string()))
            }
            other => other,
        };
        let audio = match audio {
            Ok(audio) => audio,
            Err(e) => {
                unload_locked(&mut state, &transport);
                return Err(self.shared.fail(e));
            }
        };

        let duration = {
            let mut node = lock_transport(&transport);
            node.load(audio.samples);
            node.schedule(Schedule {
                active: Some(false),
                input_secs: Some(0.0),
                output_secs: Some(0.0),
                rate: Some(state.speed),
            });
            node.duration_secs()
        };
        state.duration = duration;
        state.end_bound = duration;
        state.last_reported = 0.0;
        state.phase = EnginePhase::Stopped;
        tracing::info!(duration_secs = duration, "track loaded");
        self.shared.events.publish(EngineEvent::Loaded { duration });
        Ok(())
    }

    /// Decode `bytes` on the calling thread and load the result.
    pub fn load_encoded(&self, bytes: Vec<u8>, format_hint: Option<&str>) -> Result<()> {
        let audio = decode::decode_audio(bytes, format_hint).map_err(|e| self.shared.fail(e))?;
        self.load_track(audio)
    }

    /// Start playback at the current position and speed.
    pub fn play(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        match state.phase {
            EnginePhase::Uninitialized => return Err(EngineError::NotInitialized),
            EnginePhase::Empty => {
                tracing::debug!("play ignored: no track loaded");
                return Ok(());
            }
            EnginePhase::Playing => return Ok(()),
            EnginePhase::Stopped | EnginePhase::Ended => {}
        }

        if let Some(output) = state.output.as_mut() {
            output.resume()?;
        }
        if let Some(transport) = &state.transport {
            lock_transport(transport).schedule(Schedule {
                active: Some(true),
                rate: Some(state.speed),
                ..Schedule::default()
            });
        }
        state.phase = EnginePhase::Playing;
        start_polling(&self.shared, &mut state);
        self.shared.events.publish(EngineEvent::Play);
        Ok(())
    }

    /// Stop the transport where it is. Safe to call repeatedly.
    pub fn pause(&self) {
        let mut state = self.shared.lock_state();
        if state.phase == EnginePhase::Uninitialized {
            return;
        }
        self.shared.pause_locked(&mut state);
    }

    /// Move the read position, clamped to the loaded track.
    pub fn seek(&self, time: f64) {
        let mut state = self.shared.lock_state();
        if !matches!(
            state.phase,
            EnginePhase::Stopped | EnginePhase::Playing | EnginePhase::Ended
        ) {
            return;
        }
        let Some(transport) = state.transport.clone() else {
            return;
        };

        let time = if time.is_finite() { time } else { 0.0 }.clamp(0.0, state.duration);
        lock_transport(&transport).schedule(Schedule {
            input_secs: Some(time),
            output_secs: Some(time),
            ..Schedule::default()
        });
        state.last_reported = time;
        if state.phase == EnginePhase::Ended {
            state.phase = EnginePhase::Stopped;
        }
        self.shared.events.publish(EngineEvent::TimeUpdate { time });
    }

    /// Pause and rewind to zero.
    pub fn stop(&self) {
        self.pause();
        self.seek(0.0);
    }

    /// Change the tempo multiplier without changing pitch.
    pub fn set_speed(&self, speed: f64) {
        let mut state = self.shared.lock_state();
        state.speed = self.shared.config.clamp_speed(speed);
        if let Some(transport) = &state.transport {
            lock_transport(transport).schedule(Schedule {
                rate: Some(state.speed),
                ..Schedule::default()
            });
        }
    }

    pub fn set_volume(&self, volume: f64) {
        if !volume.is_finite() {
            return;
        }
        let mut state = self.shared.lock_state();
        state.volume = volume.clamp(0.0, 1.0);
        if let Some(transport) = &state.transport {
            lock_transport(transport).set_gain(state.volume as f32);
        }
    }

    /// Apply fades, start delay and end point for the loaded track.
    pub fn set_envelope(&self, envelope: Envelope) {
        let mut state = self.shared.lock_state();
        let Some(transport) = state.transport.clone() else {
            return;
        };
        let mut node = lock_transport(&transport);
        if !node.has_audio() {
            return;
        }
        node.set_envelope(envelope);
        state.end_bound = envelope.end_bound(state.duration);
    }

    pub fn get_state(&self) -> EngineSnapshot {
        let state = self.shared.lock_state();
        let current_time = state
            .transport
            .as_ref()
            .map(|t| lock_transport(t).input_secs().min(state.duration))
            .unwrap_or(0.0);
        EngineSnapshot {
            is_initialized: state.phase != EnginePhase::Uninitialized,
            is_playing: state.phase == EnginePhase::Playing,
            current_time,
            duration: state.duration,
            speed: state.speed,
        }
    }

    /// Run one position poll. The built-in poller calls this every
    /// `poll_interval_ms`; hosts that disable it drive it themselves.
    pub fn poll_position(&self) {
        let mut state = self.shared.lock_state();
        self.shared.tick(&mut state);
    }

    /// Release the output, drop all subscribers and return to `Uninitialized`.
    pub fn dispose(&self) {
        let mut state = self.shared.lock_state();
        stop_polling(&mut state);
        if let Some(mut output) = state.output.take() {
            output.close();
        }
        let generation = state.poll_generation;
        *state = EngineState {
            poll_generation: generation,
            ..EngineState::default()
        };
        self.shared.events.clear();
        tracing::info!("audio engine disposed");
    }
}

impl EngineShared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `err` as an `Error` event and hand it back.
    fn fail(&self, err: EngineError) -> EngineError {
        tracing::warn!(error = %err, "engine command failed");
        self.events.publish(EngineEvent::Error {
            cause: err.to_string(),
        });
        err
    }

    fn pause_locked(&self, state: &mut EngineState) {
        if let Some(transport) = &state.transport {
            lock_transport(transport).schedule(Schedule {
                active: Some(false),
                ..Schedule::default()
            });
        }
        stop_polling(state);
        if state.phase == EnginePhase::Playing {
            state.phase = EnginePhase::Stopped;
            self.events.publish(EngineEvent::Pause);
        }
    }

    /// One poll step. Returns whether polling should continue.
    fn tick(&self, state: &mut EngineState) -> bool {
        if state.phase != EnginePhase::Playing {
            return false;
        }
        let Some(transport) = state.transport.clone() else {
            return false;
        };
        let position = lock_transport(&transport).input_secs().min(state.duration);

        match evaluate_tick(position, state.end_bound, state.last_reported, &self.config) {
            Tick::Ended => {
                lock_transport(&transport).schedule(Schedule {
                    active: Some(false),
                    ..Schedule::default()
                });
                state.phase = EnginePhase::Ended;
                state.last_reported = position;
                stop_polling(state);
                tracing::debug!(position_secs = position, "track ended");
                self.events.publish(EngineEvent::Ended);
                false
            }
            Tick::Report(time) => {
                state.last_reported = time;
                self.events.publish(EngineEvent::TimeUpdate { time });
                true
            }
            Tick::Quiet => true,
        }
    }
}

fn lock_transport(transport: &SharedTransport) -> MutexGuard<'_, TransportNode> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unload_locked(state: &mut EngineState, transport: &SharedTransport) {
    lock_transport(transport).unload();
    state.duration = 0.0;
    state.end_bound = 0.0;
    state.last_reported = 0.0;
    state.phase = EnginePhase::Empty;
}

fn stop_polling(state: &mut EngineState) {
    state.poll_generation = state.poll_generation.wrapping_add(1);
}

fn start_polling(shared: &Arc<EngineShared>, state: &mut EngineState) {
    stop_polling(state);
    let generation = state.poll_generation;
    let interval = shared.config.poll_interval_ms;
    if interval == 0 {
        return;
    }

    let weak: Weak<EngineShared> = Arc::downgrade(shared);
    let spawned = thread::Builder::new()
        .name("deck-poll".to_string())
        .spawn(move || {
            loop {
                thread::sleep(Duration::from_millis(interval));
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let mut state = shared.lock_state();
                if state.poll_generation != generation || !shared.tick(&mut state) {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start position poller");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OfflineOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RATE: u32 = 8_000;

    fn manual_config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn engine() -> (AudioEngine, OfflineOutput) {
        let output = OfflineOutput::new(RATE);
        let engine = AudioEngine::new(manual_config(), output.clone());
        engine.initialize().unwrap();
        (engine, output)
    }

    fn dc(secs: f64) -> DecodedAudio {
        DecodedAudio::from_stereo(vec![0.5; (secs * RATE as f64) as usize * 2], RATE)
    }

    fn drain(rx: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        rx.try_iter().collect()
    }

    struct CountingBackend {
        inner: OfflineOutput,
        opens: Arc<AtomicUsize>,
    }

    impl OutputBackend for CountingBackend {
        fn open(&self, transport: SharedTransport) -> Result<Box<dyn OutputContext>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open(transport)
        }
    }

    #[test]
    fn evaluate_tick_prefers_ended() {
        let cfg = EngineConfig::default();
        assert_eq!(evaluate_tick(9.95, 10.0, 9.0, &cfg), Tick::Ended);
        assert_eq!(evaluate_tick(5.0, 10.0, 4.9, &cfg), Tick::Report(5.0));
        assert_eq!(evaluate_tick(5.0, 10.0, 4.995, &cfg), Tick::Quiet);
    }

    #[test]
    fn initialize_is_idempotent() {
        let opens = Arc::new(AtomicUsize::new(0));
        let engine = AudioEngine::new(
            manual_config(),
            CountingBackend {
                inner: OfflineOutput::new(RATE),
                opens: opens.clone(),
            },
        );
        engine.initialize().unwrap();
        engine.initialize().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(engine.phase(), EnginePhase::Empty);
        assert_eq!(engine.output_sample_rate(), Some(RATE));
    }

    #[test]
    fn initialize_failure_leaves_engine_uninitialized() {
        let engine = AudioEngine::new(manual_config(), OfflineOutput::unavailable());
        let err = engine.initialize().unwrap_err();
        assert!(matches!(err, EngineError::Init(_)));
        assert!(!engine.get_state().is_initialized);
        assert_eq!(engine.play(), Err(EngineError::NotInitialized));
    }

    #[test]
    fn load_before_initialize_emits_error() {
        let engine = AudioEngine::new(manual_config(), OfflineOutput::new(RATE));
        let rx = engine.subscribe();
        assert_eq!(engine.load_track(dc(1.0)), Err(EngineError::NotInitialized));
        assert!(matches!(drain(&rx).as_slice(), [EngineEvent::Error { .. }]));
    }

    #[test]
    fn load_emits_loaded_with_duration() {
        let (engine, _) = engine();
        let rx = engine.subscribe();
        engine.load_track(dc(2.0)).unwrap();
        assert_eq!(drain(&rx), vec![EngineEvent::Loaded { duration: 2.0 }]);
        let state = engine.get_state();
        assert_eq!(state.duration, 2.0);
        assert_eq!(state.current_time, 0.0);
        assert!(!state.is_playing);
    }

    #[test]
    fn load_while_playing_pauses_first() {
        let (engine, output) = engine();
        engine.load_track(dc(2.0)).unwrap();
        engine.play().unwrap();
        output.render_secs(0.5);
        let rx = engine.subscribe();
        engine.load_track(dc(3.0)).unwrap();
        assert_eq!(
            drain(&rx),
            vec![EngineEvent::Pause, EngineEvent::Loaded { duration: 3.0 }]
        );
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(engine.get_state().current_time, 0.0);
    }

    #[test]
    fn load_resamples_to_output_rate() {
        let (engine, _) = engine();
        let audio = DecodedAudio::from_stereo(vec![0.0; 16_000 * 2], 16_000);
        engine.load_track(audio).unwrap();
        assert!((engine.get_state().duration - 1.0).abs() < 1e-3);
    }

    #[test]
    fn garbage_bytes_emit_error_and_no_loaded() {
        let (engine, _) = engine();
        let rx = engine.subscribe();
        assert!(engine.load_encoded(vec![7; 64], None).is_err());
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::Error { .. }));
    }

    #[test]
    fn play_then_poll_reports_position() {
        let (engine, output) = engine();
        engine.load_track(dc(5.0)).unwrap();
        let rx = engine.subscribe();
        engine.play().unwrap();
        output.render_secs(1.0);
        engine.poll_position();
        let events = drain(&rx);
        assert_eq!(events[0], EngineEvent::Play);
        match events[1] {
            EngineEvent::TimeUpdate { time } => assert!((time - 1.0).abs() < 0.02, "time {time}"),
            ref other => panic!("unexpected {other:?}"),
        }
        assert!(engine.get_state().is_playing);
    }

    #[test]
    fn small_position_changes_are_not_reported() {
        let (engine, output) = engine();
        engine.load_track(dc(5.0)).unwrap();
        engine.play().unwrap();
        let rx = engine.subscribe();
        output.render(40);
        engine.poll_position();
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn reaching_the_end_emits_ended_only() {
        let (engine, output) = engine();
        engine.load_track(dc(1.0)).unwrap();
        engine.play().unwrap();
        let rx = engine.subscribe();
        output.render_secs(1.0);
        engine.poll_position();
        assert_eq!(drain(&rx), vec![EngineEvent::Ended]);
        assert_eq!(engine.phase(), EnginePhase::Ended);
        assert!(!engine.get_state().is_playing);

        // No further ticks once ended.
        engine.poll_position();
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn envelope_end_point_ends_playback_early() {
        let (engine, output) = engine();
        engine.load_track(dc(4.0)).unwrap();
        engine.set_envelope(Envelope {
            end_secs: Some(1.0),
            ..Envelope::default()
        });
        engine.play().unwrap();
        let rx = engine.subscribe();
        output.render_secs(1.0);
        engine.poll_position();
        assert_eq!(drain(&rx), vec![EngineEvent::Ended]);
    }

    #[test]
    fn seek_clamps_and_reports_immediately() {
        let (engine, _) = engine();
        engine.load_track(dc(3.0)).unwrap();
        let rx = engine.subscribe();
        engine.seek(10.0);
        engine.seek(-1.0);
        engine.seek(1.5);
        assert_eq!(
            drain(&rx),
            vec![
                EngineEvent::TimeUpdate { time: 3.0 },
                EngineEvent::TimeUpdate { time: 0.0 },
                EngineEvent::TimeUpdate { time: 1.5 },
            ]
        );
        assert!((engine.get_state().current_time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn seek_without_track_is_ignored() {
        let (engine, _) = engine();
        let rx = engine.subscribe();
        engine.seek(1.0);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn stop_pauses_and_rewinds() {
        let (engine, output) = engine();
        engine.load_track(dc(3.0)).unwrap();
        engine.play().unwrap();
        output.render_secs(1.0);
        let rx = engine.subscribe();
        engine.stop();
        assert_eq!(
            drain(&rx),
            vec![EngineEvent::Pause, EngineEvent::TimeUpdate { time: 0.0 }]
        );
        assert_eq!(engine.get_state().current_time, 0.0);
    }

    #[test]
    fn pause_twice_is_harmless() {
        let (engine, _) = engine();
        engine.load_track(dc(1.0)).unwrap();
        engine.play().unwrap();
        let rx = engine.subscribe();
        engine.pause();
        engine.pause();
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(drain(&rx), vec![EngineEvent::Pause]);
    }

    #[test]
    fn pause_without_playback_emits_nothing() {
        let (engine, output) = engine();
        let rx = engine.subscribe();
        engine.pause();
        engine.load_track(dc(1.0)).unwrap();
        engine.pause();
        engine.play().unwrap();
        output.render_secs(1.0);
        engine.poll_position();
        engine.pause();
        assert_eq!(
            drain(&rx),
            vec![
                EngineEvent::Loaded { duration: 1.0 },
                EngineEvent::Play,
                EngineEvent::Ended,
            ]
        );
    }

    #[test]
    fn failed_load_unloads_previous_track() {
        let (engine, output) = engine();
        engine.load_track(dc(2.0)).unwrap();
        engine.play().unwrap();
        output.render_secs(0.5);

        let rx = engine.subscribe();
        let unconvertible = DecodedAudio::from_stereo(vec![0.5; 200], 0);
        assert!(matches!(
            engine.load_track(unconvertible),
            Err(EngineError::Resample(_))
        ));
        let events = drain(&rx);
        assert_eq!(events[0], EngineEvent::Pause);
        assert!(matches!(events[1], EngineEvent::Error { .. }));
        assert_eq!(events.len(), 2);

        assert_eq!(engine.phase(), EnginePhase::Empty);
        let state = engine.get_state();
        assert_eq!(state.duration, 0.0);
        assert_eq!(state.current_time, 0.0);
        engine.play().unwrap();
        assert_eq!(engine.phase(), EnginePhase::Empty);
        assert!(output.render(64).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn empty_audio_is_rejected_and_unloads() {
        let (engine, _) = engine();
        engine.load_track(dc(1.0)).unwrap();
        assert!(matches!(
            engine.load_track(DecodedAudio::from_stereo(Vec::new(), RATE)),
            Err(EngineError::Decode(_))
        ));
        assert_eq!(engine.phase(), EnginePhase::Empty);
        assert_eq!(engine.get_state().duration, 0.0);
    }

    #[test]
    fn speed_and_volume_are_clamped() {
        let (engine, _) = engine();
        engine.set_speed(5.0);
        assert_eq!(engine.get_state().speed, 2.0);
        engine.set_speed(0.2);
        assert_eq!(engine.get_state().speed, 0.5);
        engine.set_volume(3.0);
        engine.set_volume(f64::NAN);
    }

    #[test]
    fn speed_set_before_load_survives_load() {
        let (engine, output) = engine();
        engine.set_speed(2.0);
        engine.load_track(dc(10.0)).unwrap();
        engine.play().unwrap();
        output.render_secs(1.0);
        let pos = engine.get_state().current_time;
        assert!((pos - 2.0).abs() < 0.1, "pos {pos}");
    }

    #[test]
    fn dispose_clears_listeners_and_allows_reinit() {
        let opens = Arc::new(AtomicUsize::new(0));
        let engine = AudioEngine::new(
            manual_config(),
            CountingBackend {
                inner: OfflineOutput::new(RATE),
                opens: opens.clone(),
            },
        );
        engine.initialize().unwrap();
        let rx = engine.subscribe();
        engine.dispose();
        engine.dispose();
        assert!(rx.recv().is_err());
        assert!(!engine.get_state().is_initialized);

        engine.initialize().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn background_poller_detects_end() {
        let output = OfflineOutput::new(RATE);
        let engine = AudioEngine::new(
            EngineConfig {
                poll_interval_ms: 5,
                ..EngineConfig::default()
            },
            output.clone(),
        );
        engine.initialize().unwrap();
        engine.load_track(dc(0.5)).unwrap();
        let rx = engine.subscribe();
        engine.play().unwrap();
        output.render_secs(0.5);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut saw_ended = false;
        while let Ok(ev) = rx.recv_deadline(deadline) {
            if ev == EngineEvent::Ended {
                saw_ended = true;
                break;
            }
        }
        assert!(saw_ended);
    }
}
