//! Load-time resample stage.
//!
//! Uses Rubato to convert a decoded track to the output device rate once,
//! before it reaches the transport. The transport itself only ever sees
//! audio at the device rate.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::{DecodedAudio, OUTPUT_CHANNELS};
use crate::error::{EngineError, Result};

/// Convert `audio` to `dst_rate`. Returns the input untouched when the rates already match.
pub fn resample_to(audio: DecodedAudio, dst_rate: u32, chunk_frames: usize) -> Result<DecodedAudio> {
    if audio.sample_rate == dst_rate || audio.samples.is_empty() {
        return Ok(audio);
    }
    if audio.sample_rate == 0 || dst_rate == 0 {
        return Err(EngineError::Resample(format!(
            "invalid rate conversion {} -> {dst_rate}",
            audio.sample_rate
        )));
    }

    let samples = resample_interleaved(
        &audio.samples,
        OUTPUT_CHANNELS,
        audio.sample_rate,
        dst_rate,
        chunk_frames,
    )?;
    tracing::debug!(
        from_hz = audio.sample_rate,
        to_hz = dst_rate,
        frames = samples.len() / OUTPUT_CHANNELS,
        "resampled track"
    );
    Ok(DecodedAudio {
        samples,
        sample_rate: dst_rate,
        source: audio.source,
    })
}

/// Resample a complete interleaved buffer with a sinc interpolator.
///
/// The output is trimmed to `frames * dst_rate / src_rate` so durations line up
/// with the source.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<Vec<f32>> {
    let channels = channels.max(1);
    let in_frames = input.len() / channels;
    let f_ratio = dst_rate as f64 / src_rate as f64;
    let expected_frames = (in_frames as f64 * f_ratio).round() as usize;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_in_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| EngineError::Resample(e.to_string()))?;

    let mut out = Vec::with_capacity((expected_frames + chunk_in_frames) * channels);
    let mut scratch_in = vec![0.0f32; chunk_in_frames * channels];
    let mut scratch_out = vec![0.0f32; channels * chunk_in_frames * 3];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut pos = 0usize;
    // Keep feeding silence past the end until the filter delay has drained.
    while out.len() / channels < expected_frames {
        let remaining = in_frames.saturating_sub(pos);
        let take = remaining.min(chunk_in_frames);
        scratch_in.fill(0.0);
        if take > 0 {
            scratch_in[..take * channels]
                .copy_from_slice(&input[pos * channels..(pos + take) * channels]);
        }
        pos += take;
        indexing.partial_len = if take < chunk_in_frames { Some(take) } else { None };

        let input_adapter = InterleavedSlice::new(&scratch_in, channels, chunk_in_frames)
            .map_err(|e| EngineError::Resample(e.to_string()))?;
        let out_capacity_frames = scratch_out.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut scratch_out, channels, out_capacity_frames)
                .map_err(|e| EngineError::Resample(e.to_string()))?;

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| EngineError::Resample(e.to_string()))?;
        if nbr_out == 0 && take == 0 {
            break;
        }
        out.extend_from_slice(&scratch_out[..nbr_out * channels]);
    }

    out.truncate(expected_frames * channels);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_through() {
        let audio = DecodedAudio::from_stereo(vec![0.1, 0.2, 0.3, 0.4], 48_000);
        let out = resample_to(audio.clone(), 48_000, 1024).unwrap();
        assert_eq!(out, audio);
    }

    #[test]
    fn upsampling_scales_length() {
        let frames = 4_410;
        let input: Vec<f32> = (0..frames * 2)
            .map(|i| ((i / 2) as f32 * 0.05).sin() * 0.5)
            .collect();
        let audio = DecodedAudio::from_stereo(input, 44_100);
        let out = resample_to(audio, 48_000, 1024).unwrap();
        assert_eq!(out.sample_rate, 48_000);
        assert_eq!(out.frames(), 4_800);
        assert!((out.duration_secs() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let audio = DecodedAudio::from_stereo(vec![0.0; 8], 0);
        let err = resample_to(audio, 48_000, 256).unwrap_err();
        assert!(matches!(err, EngineError::Resample(_)));
    }
}
