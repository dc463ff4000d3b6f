//! Whole-track decode stage.
//!
//! Uses Symphonia to:
//! - probe an in-memory audio blob
//! - decode every packet of the default track
//! - fold the result into interleaved stereo `f32` (mono is duplicated)

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{EngineError, Result};

/// Channel count of every [`DecodedAudio`].
pub const OUTPUT_CHANNELS: usize = 2;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Channel count before folding to stereo.
    pub channels: usize,
    /// Sample rate of the encoded stream.
    pub sample_rate: u32,
}

/// A fully decoded track: interleaved stereo `f32` at `sample_rate`.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub source: SourceInfo,
}

impl DecodedAudio {
    /// Wrap already-decoded interleaved stereo samples.
    pub fn from_stereo(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            source: SourceInfo {
                codec: None,
                channels: OUTPUT_CHANNELS,
                sample_rate,
            },
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / OUTPUT_CHANNELS
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decode a complete audio blob into memory.
///
/// `format_hint` is a file extension such as `mp3` or `flac`; probing works
/// without it but is faster and more reliable with it.
pub fn decode_audio(bytes: Vec<u8>, format_hint: Option<&str>) -> Result<DecodedAudio> {
    let (mut format, track_id, codec_params) = open_format(bytes, format_hint)?;

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Decode("unknown sample rate".to_string()))?;
    let mut source = SourceInfo {
        codec: codec_name_from_params(&codec_params),
        channels: codec_params.channels.map(|c| c.count()).unwrap_or(0),
        sample_rate,
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let mut samples = Vec::new();
    if let Some(frames) = codec_params.n_frames {
        samples.reserve(frames as usize * OUTPUT_CHANNELS);
    }

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if samples.is_empty() => return Err(EngineError::Decode(e.to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "stopping decode early");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::debug!(reason = msg, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if source.channels == 0 {
            source.channels = channels;
        }
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        fold_to_stereo(sample_buf.samples(), channels, &mut samples);
    }

    if samples.is_empty() {
        return Err(EngineError::Decode("no audio frames decoded".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        source,
    })
}

/// Best-effort duration from container metadata, without decoding.
///
/// Returns `Ok(None)` when the container does not record a frame count.
pub fn probe_duration_secs(bytes: Vec<u8>, format_hint: Option<&str>) -> Result<Option<f64>> {
    let (_, _, codec_params) = open_format(bytes, format_hint)?;
    Ok(duration_ms_from_codec_params(&codec_params).map(|ms| ms as f64 / 1000.0))
}

fn open_format(
    bytes: Vec<u8>,
    format_hint: Option<&str>,
) -> Result<(Box<dyn FormatReader>, u32, CodecParameters)> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = format_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| EngineError::Decode("no default audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    Ok((format, track_id, codec_params))
}

/// Append interleaved `src` (with `channels` channels) to `out` as stereo.
///
/// Mono is duplicated to both sides; layouts wider than stereo keep the
/// front left/right pair.
fn fold_to_stereo(src: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            for &s in src {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(src),
        n => {
            for frame in src.chunks_exact(n) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
pub(crate) fn wav_bytes(
    channels: u16,
    sample_rate: u32,
    frames: usize,
    sample: impl Fn(usize, u16) -> f32,
) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            for ch in 0..channels {
                let v = (sample(i, ch) * i16::MAX as f32) as i16;
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_wav_is_duplicated_to_stereo() {
        let bytes = wav_bytes(1, 8_000, 800, |i, _| if i % 2 == 0 { 0.5 } else { -0.5 });
        let audio = decode_audio(bytes, Some("wav")).unwrap();
        assert_eq!(audio.sample_rate, 8_000);
        assert_eq!(audio.frames(), 800);
        assert_eq!(audio.source.channels, 1);
        for frame in audio.samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!((audio.samples[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn stereo_wav_keeps_channel_order() {
        let bytes = wav_bytes(2, 16_000, 1_600, |_, ch| if ch == 0 { 0.25 } else { -0.25 });
        let audio = decode_audio(bytes, None).unwrap();
        assert!((audio.duration_secs() - 0.1).abs() < 1e-9);
        assert!((audio.samples[0] - 0.25).abs() < 1e-3);
        assert!((audio.samples[1] + 0.25).abs() < 1e-3);
        assert_eq!(audio.source.codec.as_deref(), Some("PCM_S16"));
    }

    #[test]
    fn garbage_bytes_fail_with_decode_error() {
        let err = decode_audio(vec![0x13; 512], Some("mp3")).unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn probe_reports_container_duration() {
        let bytes = wav_bytes(2, 8_000, 16_000, |_, _| 0.0);
        let secs = probe_duration_secs(bytes, Some("wav")).unwrap();
        assert_eq!(secs, Some(2.0));
    }

    #[test]
    fn fold_to_stereo_keeps_front_pair_of_surround() {
        let mut out = Vec::new();
        fold_to_stereo(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 3, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.4, 0.5]);
    }

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }
}
