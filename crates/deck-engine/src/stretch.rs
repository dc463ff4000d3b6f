//! Streaming WSOLA time-stretcher.
//!
//! Reads an in-memory stereo source at an arbitrary rate and emits audio at a
//! fixed synthesis hop, so tempo changes leave pitch untouched. Each segment
//! is picked near the nominal read position by waveform similarity with the
//! natural continuation of the previous segment, then overlap-added through a
//! Hann window at 50% overlap.

use std::f64::consts::PI;

use crate::decode::OUTPUT_CHANNELS;

/// Correlation is evaluated on every Nth frame of the overlap.
const CORRELATION_STRIDE: usize = 4;

pub struct WsolaStretcher {
    window: usize,
    hop: usize,
    search: usize,
    hann: Vec<f32>,
    /// Windowed second half of the previous segment.
    tail: Vec<f32>,
    prev_start: Option<isize>,
    /// One hop of finished output.
    ready: Vec<f32>,
    ready_pos: usize,
    /// Source position of `ready[0]`, in frames.
    ready_src: f64,
    ready_rate: f64,
}

impl WsolaStretcher {
    /// Create a stretcher whose window is `window_ms` rounded up to a power of two.
    pub fn new(sample_rate: u32, window_ms: f64) -> Self {
        let window = ((sample_rate as f64 * window_ms / 1000.0) as usize)
            .max(64)
            .next_power_of_two();
        let hop = window / 2;
        let hann = (0..window)
            .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f64 / window as f64).cos())) as f32)
            .collect();
        Self {
            window,
            hop,
            search: window / 4,
            hann,
            tail: vec![0.0; hop * OUTPUT_CHANNELS],
            prev_start: None,
            ready: vec![0.0; hop * OUTPUT_CHANNELS],
            ready_pos: hop,
            ready_src: 0.0,
            ready_rate: 1.0,
        }
    }

    pub fn window_frames(&self) -> usize {
        self.window
    }

    /// Drop overlap state so the next segment starts fresh at the cursor.
    pub fn reset(&mut self) {
        self.tail.fill(0.0);
        self.prev_start = None;
        self.ready_pos = self.hop;
    }

    /// Source position of the next frame [`next_frame`](Self::next_frame) will return,
    /// when one is already synthesized.
    pub fn buffered_position(&self) -> Option<f64> {
        (self.ready_pos < self.hop).then(|| self.ready_src + self.ready_pos as f64 * self.ready_rate)
    }

    /// Produce one stereo output frame.
    ///
    /// `cursor` is the nominal read position in source frames; it advances by
    /// `hop * rate` every time a new segment is synthesized. Returns the frame
    /// and the source position it stands for.
    pub fn next_frame(&mut self, source: &[f32], cursor: &mut f64, rate: f64) -> ([f32; 2], f64) {
        if self.ready_pos >= self.hop {
            self.synthesize(source, cursor, rate);
        }
        let i = self.ready_pos * OUTPUT_CHANNELS;
        let frame = [self.ready[i], self.ready[i + 1]];
        let src = self.ready_src + self.ready_pos as f64 * self.ready_rate;
        self.ready_pos += 1;
        (frame, src)
    }

    fn synthesize(&mut self, source: &[f32], cursor: &mut f64, rate: f64) {
        let target = cursor.round() as isize;
        let start = match self.prev_start {
            Some(prev) if (rate - 1.0).abs() < 1e-9 => {
                // Unstretched playback continues the previous segment exactly.
                let natural = prev + self.hop as isize;
                *cursor = natural as f64;
                natural
            }
            Some(prev) => self.best_match(source, target, prev + self.hop as isize),
            None => target,
        };

        self.ready_src = *cursor;
        self.ready_rate = rate;
        for i in 0..self.window {
            let w = self.hann[i];
            for ch in 0..OUTPUT_CHANNELS {
                let s = sample_at(source, start + i as isize, ch) * w;
                if i < self.hop {
                    self.ready[i * OUTPUT_CHANNELS + ch] = self.tail[i * OUTPUT_CHANNELS + ch] + s;
                } else {
                    self.tail[(i - self.hop) * OUTPUT_CHANNELS + ch] = s;
                }
            }
        }
        self.ready_pos = 0;
        self.prev_start = Some(start);
        *cursor += self.hop as f64 * rate;
    }

    /// Candidate start within `target ± search` most similar to `natural`.
    fn best_match(&self, source: &[f32], target: isize, natural: isize) -> isize {
        let mut best = target;
        let mut best_score = f32::NEG_INFINITY;
        let lo = (target - self.search as isize).max(0);
        let hi = target + self.search as isize;
        for pos in lo..=hi {
            let score = self.similarity(source, pos, natural);
            if score > best_score {
                best_score = score;
                best = pos;
            }
        }
        best
    }

    /// Normalized cross-correlation of the mono mix over one hop.
    fn similarity(&self, source: &[f32], pos: isize, reference: isize) -> f32 {
        let mut sum = 0.0f32;
        let mut energy_a = 0.0f32;
        let mut energy_b = 0.0f32;
        for i in (0..self.hop).step_by(CORRELATION_STRIDE) {
            let a = mono_at(source, pos + i as isize);
            let b = mono_at(source, reference + i as isize);
            sum += a * b;
            energy_a += a * a;
            energy_b += b * b;
        }
        let denominator = (energy_a * energy_b).sqrt();
        if denominator > 1e-10 {
            sum / denominator
        } else {
            0.0
        }
    }
}

fn sample_at(source: &[f32], frame: isize, ch: usize) -> f32 {
    if frame < 0 {
        return 0.0;
    }
    source
        .get(frame as usize * OUTPUT_CHANNELS + ch)
        .copied()
        .unwrap_or(0.0)
}

fn mono_at(source: &[f32], frame: isize) -> f32 {
    0.5 * (sample_at(source, frame, 0) + sample_at(source, frame, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, period: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let v = (2.0 * std::f32::consts::PI * (i % period) as f32 / period as f32).sin() * 0.5;
            out.push(v);
            out.push(v);
        }
        out
    }

    fn render(stretcher: &mut WsolaStretcher, source: &[f32], rate: f64, frames: usize) -> (Vec<f32>, f64) {
        let mut cursor = 0.0;
        let mut out = Vec::with_capacity(frames);
        for _ in 0..frames {
            let (frame, _) = stretcher.next_frame(source, &mut cursor, rate);
            out.push(frame[0]);
        }
        (out, cursor)
    }

    #[test]
    fn window_is_power_of_two() {
        let stretcher = WsolaStretcher::new(48_000, 25.0);
        assert_eq!(stretcher.window_frames(), 2048);
        let small = WsolaStretcher::new(8_000, 1.0);
        assert_eq!(small.window_frames(), 64);
    }

    #[test]
    fn unit_rate_reconstructs_input_after_first_hop() {
        let source = vec![0.5f32; 48_000 * 2];
        let mut stretcher = WsolaStretcher::new(48_000, 25.0);
        let (out, cursor) = render(&mut stretcher, &source, 1.0, 8_192);
        for &s in &out[1024..] {
            assert!((s - 0.5).abs() < 1e-4, "sample {s}");
        }
        assert!((cursor - 8_192.0).abs() < 1e-9);
    }

    #[test]
    fn cursor_advances_with_rate() {
        let source = sine(96_000, 100);
        let mut fast = WsolaStretcher::new(48_000, 25.0);
        let (_, fast_cursor) = render(&mut fast, &source, 2.0, 10_240);
        let mut slow = WsolaStretcher::new(48_000, 25.0);
        let (_, slow_cursor) = render(&mut slow, &source, 0.5, 10_240);
        // 10 hops consumed, each advancing hop * rate.
        assert!((fast_cursor - 20_480.0).abs() < 1e-9);
        assert!((slow_cursor - 5_120.0).abs() < 1e-9);
    }

    #[test]
    fn stretched_sine_keeps_its_period() {
        let source = sine(200_000, 100);
        let mut stretcher = WsolaStretcher::new(48_000, 25.0);
        let frames = 48_000;
        let (out, _) = render(&mut stretcher, &source, 1.5, frames);
        let skip = stretcher.window_frames();
        let crossings = out[skip..]
            .windows(2)
            .filter(|w| w[0] < 0.0 && w[1] >= 0.0)
            .count();
        let expected = (frames - skip) as f64 / 100.0;
        assert!(
            (crossings as f64 - expected).abs() / expected < 0.02,
            "crossings {crossings}, expected {expected}"
        );
    }

    #[test]
    fn reading_past_the_end_yields_silence() {
        let source = vec![0.3f32; 256 * 2];
        let mut stretcher = WsolaStretcher::new(8_000, 25.0);
        let mut cursor = 10_000.0;
        let (frame, src) = stretcher.next_frame(&source, &mut cursor, 1.0);
        assert_eq!(frame, [0.0, 0.0]);
        assert_eq!(src, 10_000.0);
    }

    #[test]
    fn buffered_position_tracks_emitted_frames() {
        let source = vec![0.1f32; 48_000 * 2];
        let mut stretcher = WsolaStretcher::new(48_000, 25.0);
        assert_eq!(stretcher.buffered_position(), None);
        let mut cursor = 480.0;
        stretcher.next_frame(&source, &mut cursor, 1.25);
        assert_eq!(stretcher.buffered_position(), Some(481.25));
        stretcher.reset();
        assert_eq!(stretcher.buffered_position(), None);
    }
}
