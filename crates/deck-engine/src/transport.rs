//! Transport node.
//!
//! Holds the loaded track at the output rate and renders it through the
//! time-stretcher. The output callback pulls from it; engine commands change
//! its schedule (active flag, read cursor, rate) under the same lock, so a
//! schedule change is always applied between two callback blocks.

use std::sync::{Arc, Mutex};

use deck_types::Track;

use crate::decode::OUTPUT_CHANNELS;
use crate::stretch::WsolaStretcher;

/// Transport shared between engine commands and the output callback.
pub type SharedTransport = Arc<Mutex<TransportNode>>;

/// Per-track gain shaping and lead-in silence, all in seconds on the track timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Envelope {
    pub start_secs: f64,
    /// Defaults to the end of the audio.
    pub end_secs: Option<f64>,
    pub fade_in_secs: f64,
    pub fade_out_secs: f64,
    /// Silence played before the start point when playback begins there.
    pub start_delay_secs: f64,
}

impl Envelope {
    pub fn from_track(track: &Track) -> Self {
        Self {
            start_secs: track.start_or_zero().max(0.0),
            end_secs: track.end_time_secs,
            fade_in_secs: track.fade_in_secs.max(0.0),
            fade_out_secs: track.fade_out_secs.max(0.0),
            start_delay_secs: track.start_delay_secs.max(0.0),
        }
    }

    /// Effective end point for audio of length `duration`.
    pub fn end_bound(&self, duration: f64) -> f64 {
        self.end_secs.map_or(duration, |end| end.min(duration))
    }

    /// Envelope gain at track time `t`.
    pub fn gain_at(&self, t: f64, duration: f64) -> f32 {
        let end = self.end_bound(duration);
        if t >= end {
            return 0.0;
        }
        let mut gain = 1.0;
        if self.fade_in_secs > 0.0 {
            let into = t - self.start_secs;
            if into < self.fade_in_secs {
                gain *= (into / self.fade_in_secs).clamp(0.0, 1.0);
            }
        }
        if self.fade_out_secs > 0.0 {
            let left = end - t;
            if left < self.fade_out_secs {
                gain *= (left / self.fade_out_secs).clamp(0.0, 1.0);
            }
        }
        gain as f32
    }
}

/// Partial schedule update; unset fields keep their value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Schedule {
    pub active: Option<bool>,
    /// New read position on the track timeline.
    pub input_secs: Option<f64>,
    /// New position on the output timeline.
    pub output_secs: Option<f64>,
    pub rate: Option<f64>,
}

pub struct TransportNode {
    sample_rate: u32,
    window_ms: f64,
    source: Vec<f32>,
    stretcher: WsolaStretcher,
    active: bool,
    rate: f64,
    gain: f32,
    envelope: Envelope,
    /// Read cursor in source frames.
    cursor: f64,
    output_secs: f64,
    delay_frames: u64,
}

impl TransportNode {
    /// Empty, inactive node. Call [`prepare`](Self::prepare) once the output rate is known.
    pub fn new(window_ms: f64) -> Self {
        Self {
            sample_rate: 0,
            window_ms,
            source: Vec::new(),
            stretcher: WsolaStretcher::new(0, window_ms),
            active: false,
            rate: 1.0,
            gain: 1.0,
            envelope: Envelope::default(),
            cursor: 0.0,
            output_secs: 0.0,
            delay_frames: 0,
        }
    }

    /// Bind the node to the output stream rate. Drops any loaded audio.
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.stretcher = WsolaStretcher::new(sample_rate, self.window_ms);
        self.unload();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Replace the loaded audio with interleaved stereo `samples` at the node rate.
    ///
    /// The node comes back inactive, at position zero, with no envelope.
    pub fn load(&mut self, samples: Vec<f32>) {
        self.source = samples;
        self.active = false;
        self.envelope = Envelope::default();
        self.delay_frames = 0;
        self.cursor = 0.0;
        self.output_secs = 0.0;
        self.stretcher.reset();
    }

    /// Drop the loaded audio.
    pub fn unload(&mut self) {
        self.load(Vec::new());
    }

    pub fn has_audio(&self) -> bool {
        !self.source.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.source.len() / OUTPUT_CHANNELS) as f64 / self.sample_rate as f64
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Apply a schedule change atomically with respect to rendering.
    ///
    /// Moving the read cursor also drops the stretcher overlap so playback
    /// resumes cleanly from the new point.
    pub fn schedule(&mut self, schedule: Schedule) {
        if let Some(rate) = schedule.rate {
            if rate.is_finite() && rate > 0.0 {
                self.rate = rate;
            }
        }
        if let Some(input) = schedule.input_secs {
            let frames = (self.source.len() / OUTPUT_CHANNELS) as f64;
            self.cursor = (input * self.sample_rate as f64).clamp(0.0, frames);
            self.stretcher.reset();
            self.delay_frames = if (input - self.envelope.start_secs).abs() < 1e-3 {
                self.start_delay_frames()
            } else {
                0
            };
        }
        if let Some(output) = schedule.output_secs {
            self.output_secs = output;
        }
        if let Some(active) = schedule.active {
            self.active = active;
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    /// Install a track envelope. Arms the start delay when the cursor sits at the start point.
    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = envelope;
        let at_start = (self.input_secs() - envelope.start_secs).abs() < 1e-3;
        self.delay_frames = if at_start { self.start_delay_frames() } else { 0 };
    }

    /// Track time of the next frame to be rendered.
    pub fn input_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        let frames = self.stretcher.buffered_position().unwrap_or(self.cursor);
        frames / self.sample_rate as f64
    }

    /// Time rendered on the output timeline since the last reposition.
    pub fn output_secs(&self) -> f64 {
        self.output_secs
    }

    /// Fill interleaved stereo `out`. Renders silence while inactive or empty.
    pub fn render(&mut self, out: &mut [f32]) {
        if !self.active || self.source.is_empty() || self.sample_rate == 0 {
            out.fill(0.0);
            return;
        }

        let sr = self.sample_rate as f64;
        let duration = self.duration_secs();
        let mut frames = 0usize;
        for frame in out.chunks_exact_mut(OUTPUT_CHANNELS) {
            frames += 1;
            if self.delay_frames > 0 {
                self.delay_frames -= 1;
                frame.fill(0.0);
                continue;
            }
            let (samples, src) = self
                .stretcher
                .next_frame(&self.source, &mut self.cursor, self.rate);
            let gain = self.gain * self.envelope.gain_at(src / sr, duration);
            frame[0] = samples[0] * gain;
            frame[1] = samples[1] * gain;
        }
        self.output_secs += frames as f64 / sr;
    }

    fn start_delay_frames(&self) -> u64 {
        (self.envelope.start_delay_secs * self.sample_rate as f64).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8_000;

    fn node_with_dc(secs: f64, level: f32) -> TransportNode {
        let mut node = TransportNode::new(25.0);
        node.prepare(RATE);
        let frames = (secs * RATE as f64) as usize;
        node.load(vec![level; frames * OUTPUT_CHANNELS]);
        node
    }

    fn start(node: &mut TransportNode) {
        node.schedule(Schedule {
            active: Some(true),
            ..Schedule::default()
        });
    }

    #[test]
    fn inactive_node_renders_silence() {
        let mut node = node_with_dc(1.0, 0.5);
        let mut out = vec![1.0f32; 256];
        node.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(node.input_secs(), 0.0);
    }

    #[test]
    fn active_node_applies_gain_after_first_window() {
        let mut node = node_with_dc(2.0, 0.5);
        node.set_gain(0.5);
        start(&mut node);
        let mut out = vec![0.0f32; 4_000 * OUTPUT_CHANNELS];
        node.render(&mut out);
        let settled = &out[1_000 * OUTPUT_CHANNELS..];
        assert!(settled.iter().all(|&s| (s - 0.25).abs() < 1e-4));
        assert!((node.output_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn schedule_moves_input_and_output_cursors() {
        let mut node = node_with_dc(10.0, 0.5);
        node.schedule(Schedule {
            input_secs: Some(4.0),
            output_secs: Some(4.0),
            rate: Some(1.5),
            ..Schedule::default()
        });
        assert!((node.input_secs() - 4.0).abs() < 1e-9);
        assert_eq!(node.output_secs(), 4.0);
        assert_eq!(node.rate(), 1.5);
        assert!(!node.is_active());
    }

    #[test]
    fn input_cursor_is_clamped_to_audio() {
        let mut node = node_with_dc(1.0, 0.5);
        node.schedule(Schedule {
            input_secs: Some(30.0),
            ..Schedule::default()
        });
        assert!((node.input_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn faster_rate_consumes_source_faster() {
        let mut node = node_with_dc(10.0, 0.5);
        node.schedule(Schedule {
            active: Some(true),
            rate: Some(2.0),
            ..Schedule::default()
        });
        let mut out = vec![0.0f32; RATE as usize * OUTPUT_CHANNELS];
        node.render(&mut out);
        assert!((node.input_secs() - 2.0).abs() < 0.05, "at {}", node.input_secs());
    }

    #[test]
    fn start_delay_renders_leading_silence() {
        let mut node = node_with_dc(2.0, 0.5);
        node.set_envelope(Envelope {
            start_delay_secs: 0.25,
            fade_out_secs: 0.0,
            ..Envelope::default()
        });
        start(&mut node);
        let mut out = vec![1.0f32; 2_000 * OUTPUT_CHANNELS];
        node.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(node.input_secs(), 0.0);

        let mut more = vec![0.0f32; 1_000 * OUTPUT_CHANNELS];
        node.render(&mut more);
        assert!(node.input_secs() > 0.0);
    }

    #[test]
    fn seeking_away_from_start_cancels_delay() {
        let mut node = node_with_dc(2.0, 0.5);
        node.set_envelope(Envelope {
            start_delay_secs: 1.0,
            ..Envelope::default()
        });
        node.schedule(Schedule {
            active: Some(true),
            input_secs: Some(0.5),
            ..Schedule::default()
        });
        let mut out = vec![0.0f32; 100 * OUTPUT_CHANNELS];
        node.render(&mut out);
        assert!(node.input_secs() > 0.5);
    }

    #[test]
    fn envelope_fades_in_from_start_and_out_before_end() {
        let env = Envelope {
            start_secs: 10.0,
            end_secs: Some(100.0),
            fade_in_secs: 2.0,
            fade_out_secs: 5.0,
            start_delay_secs: 0.0,
        };
        assert_eq!(env.gain_at(10.0, 180.0), 0.0);
        assert!((env.gain_at(11.0, 180.0) - 0.5).abs() < 1e-6);
        assert_eq!(env.gain_at(50.0, 180.0), 1.0);
        assert!((env.gain_at(97.5, 180.0) - 0.5).abs() < 1e-6);
        assert_eq!(env.gain_at(100.0, 180.0), 0.0);
        assert_eq!(env.gain_at(120.0, 180.0), 0.0);
    }

    #[test]
    fn envelope_end_defaults_to_duration() {
        let env = Envelope {
            fade_out_secs: 4.0,
            ..Envelope::default()
        };
        assert_eq!(env.end_bound(60.0), 60.0);
        assert!((env.gain_at(58.0, 60.0) - 0.5).abs() < 1e-6);

        let late_end = Envelope {
            end_secs: Some(90.0),
            ..Envelope::default()
        };
        assert_eq!(late_end.end_bound(60.0), 60.0);
    }

    #[test]
    fn envelope_from_track_copies_settings() {
        let track = Track {
            start_time_secs: Some(3.0),
            end_time_secs: Some(40.0),
            fade_in_secs: 1.0,
            start_delay_secs: 2.0,
            ..Track::new("t", 60.0)
        };
        let env = Envelope::from_track(&track);
        assert_eq!(env.start_secs, 3.0);
        assert_eq!(env.end_secs, Some(40.0));
        assert_eq!(env.fade_in_secs, 1.0);
        assert_eq!(env.fade_out_secs, deck_types::DEFAULT_FADE_OUT_SECS);
        assert_eq!(env.start_delay_secs, 2.0);
    }

    #[test]
    fn load_resets_schedule() {
        let mut node = node_with_dc(2.0, 0.5);
        node.schedule(Schedule {
            active: Some(true),
            input_secs: Some(1.0),
            ..Schedule::default()
        });
        node.load(vec![0.1; 400]);
        assert!(!node.is_active());
        assert_eq!(node.input_secs(), 0.0);
        assert!((node.duration_secs() - 0.025).abs() < 1e-9);
    }
}
