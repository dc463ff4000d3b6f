//! Picking the CPAL device and stream config the engine plays through.
//!
//! The default device is used unless a name substring is configured; the
//! stream config is the one closest to the preferred rate, favouring float
//! output.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Stream buffer size requested when the device reports a range.
///
/// Small enough that pause and seek feel immediate.
const TARGET_BUFFER_FRAMES: u32 = 1024;

/// Device plus the stream parameters chosen for it.
pub struct OutputSelection {
    pub device: cpal::Device,
    pub name: String,
    pub sample_format: cpal::SampleFormat,
    pub stream_config: cpal::StreamConfig,
}

/// Lightweight output device metadata for `deck devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

/// Open-ready selection for the device matching `needle` (or the default one).
pub fn select_output(
    host: &cpal::Host,
    needle: Option<&str>,
    preferred_rate: u32,
) -> Result<OutputSelection> {
    let device = pick_device(host, needle)?;
    let name = device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let config = pick_output_config(&device, Some(preferred_rate))?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buffer) = pick_buffer_size(&config) {
        stream_config.buffer_size = buffer;
    }
    Ok(OutputSelection {
        device,
        name,
        sample_format: config.sample_format(),
        stream_config,
    })
}

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            d.description()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose the supported config closest to `target_rate`.
///
/// Prefers the highest rate at or below the target, then the lowest above it,
/// then the cheapest sample format to convert to.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate((below, rate, rank), (*b_below, *b_rate, *b_rank), target_rate)
            }
        };
        if replace {
            best = Some((below, rate, rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed buffer size near [`TARGET_BUFFER_FRAMES`], or `None` to keep the device default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => Some(cpal::BufferSize::Fixed(
            TARGET_BUFFER_FRAMES.clamp(*min, (*max).max(*min)),
        )),
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Describe every output device on the default host.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.to_string());

    let mut out = Vec::new();
    for d in host.output_devices().context("No output devices")? {
        let name = d.description()?.to_string();
        let (mut min_rate, mut max_rate) = (u32::MAX, 0u32);
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
            }
        }
        if max_rate == 0 {
            match d.default_output_config() {
                Ok(cfg) => {
                    min_rate = cfg.sample_rate();
                    max_rate = cfg.sample_rate();
                }
                Err(e) => {
                    tracing::warn!(device = %name, error = %e, "skipping device without usable config");
                    continue;
                }
            }
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Compare `(below_target, rate, format_rank)` candidates.
fn is_better_candidate(
    candidate: (bool, u32, u8),
    best: (bool, u32, u8),
    target_rate: Option<u32>,
) -> bool {
    let (below, rate, rank) = candidate;
    let (best_below, best_rate, best_rank) = best;
    if below != best_below {
        return below;
    }
    if rate != best_rate {
        // Below the target, closer means higher; above it, closer means lower.
        return if below || target_rate.is_none() {
            rate > best_rate
        } else {
            rate < best_rate
        };
    }
    rank < best_rank
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", " USB "));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_clamps_target() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidate_below_target_wins() {
        assert!(is_better_candidate((true, 44_100, 2), (false, 96_000, 0), Some(48_000)));
        assert!(!is_better_candidate((false, 96_000, 0), (true, 44_100, 2), Some(48_000)));
    }

    #[test]
    fn candidate_above_target_prefers_lower_rate() {
        assert!(is_better_candidate((false, 88_200, 0), (false, 96_000, 0), Some(48_000)));
    }

    #[test]
    fn equal_rates_prefer_float_output() {
        assert!(is_better_candidate((true, 48_000, 0), (true, 48_000, 2), Some(48_000)));
        assert!(!is_better_candidate((true, 48_000, 3), (true, 48_000, 0), Some(48_000)));
    }
}
