//! Real-time CPAL callback.
//!
//! Each callback locks the transport once, renders a stereo block into a
//! reused buffer, then spreads it over the device channels in the device
//! sample format.

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::decode::OUTPUT_CHANNELS;
use crate::transport::SharedTransport;

/// Build a CPAL output stream that plays whatever `transport` renders.
///
/// The stream is created but not started.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    transport: &SharedTransport,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, transport),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, transport),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, transport),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, transport),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    transport: &SharedTransport,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let transport_cb = transport.clone();
    let mut block: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out.max(1);
            block.resize(frames * OUTPUT_CHANNELS, 0.0);

            match transport_cb.lock() {
                Ok(mut node) => node.render(&mut block),
                Err(_) => block.fill(0.0),
            }

            for (frame, out) in block
                .chunks_exact(OUTPUT_CHANNELS)
                .zip(data.chunks_exact_mut(channels_out.max(1)))
            {
                for (ch, sample) in out.iter_mut().enumerate() {
                    *sample = <T as cpal::Sample>::from_sample::<f32>(map_stereo(frame, channels_out, ch));
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Sample for device channel `dst_ch` from one stereo frame.
///
/// Mapping rules:
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - wider layouts: L/R on the first two channels, silence elsewhere
fn map_stereo(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (dst_channels, dst_ch) {
        (1, _) => 0.5 * (frame[0] + frame[1]),
        (_, 0) => frame[0],
        (_, 1) => frame[1],
        _ => 0.0,
    }
}
