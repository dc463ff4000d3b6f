use serde::Deserialize;

/// Engine tuning parameters.
///
/// Loaded from the `[engine]` table of the player config; every field has a
/// default so partial tables are fine.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Position poll period while playing. `0` disables the built-in poller;
    /// the host then drives [`crate::AudioEngine::poll_position`] itself.
    pub poll_interval_ms: u64,
    /// Playback counts as ended once the position is this close to the end.
    pub end_epsilon_secs: f64,
    /// Smallest position change worth a `TimeUpdate` event.
    pub min_report_delta_secs: f64,
    /// Lower bound for the playback-rate multiplier.
    pub min_speed: f64,
    /// Upper bound for the playback-rate multiplier.
    pub max_speed: f64,
    /// Analysis window of the time-stretcher, rounded up to a power of two in frames.
    pub stretch_window_ms: f64,
    /// Sample rate requested from the output device.
    pub preferred_sample_rate: u32,
    /// Resampler chunk size in frames.
    pub resample_chunk_frames: usize,
}

impl Default for EngineConfig {
    /// Defaults match the rehearsal UI: 100ms position updates and 0.5x-2x tempo.
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            end_epsilon_secs: 0.1,
            min_report_delta_secs: 0.01,
            min_speed: 0.5,
            max_speed: 2.0,
            stretch_window_ms: 25.0,
            preferred_sample_rate: 48_000,
            resample_chunk_frames: 1024,
        }
    }
}

impl EngineConfig {
    /// Clamp a requested playback rate into the supported range.
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        if !speed.is_finite() {
            return 1.0;
        }
        speed.clamp(self.min_speed, self.max_speed)
    }
}
