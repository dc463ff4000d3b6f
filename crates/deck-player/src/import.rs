//! Import local audio files into the blob store and the track catalog.

use std::path::Path;

use anyhow::{Context, Result};
use deck_engine::decode::probe_duration_secs;
use deck_types::Track;

use crate::storage::{AudioBlobStore, MemoryCatalog};

/// Copy `path` into `blobs` and register it in `catalog`.
///
/// The title is the file stem and the format hint the extension. Files the
/// decoder cannot probe are rejected before anything is stored.
pub fn import_file(path: &Path, blobs: &dyn AudioBlobStore, catalog: &MemoryCatalog) -> Result<Track> {
    let bytes = std::fs::read(path).with_context(|| format!("read audio file {:?}", path))?;
    let format_hint = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let duration_secs = probe_duration_secs(bytes.clone(), format_hint.as_deref())
        .with_context(|| format!("probe audio file {:?}", path))?
        .unwrap_or(0.0);

    let track = Track {
        title: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        format_hint,
        ..Track::new(uuid::Uuid::new_v4().to_string(), duration_secs)
    };
    blobs
        .save_audio_blob(&track.id, &bytes)
        .with_context(|| format!("store audio for {:?}", path))?;
    catalog.insert(track.clone());
    tracing::info!(
        track_id = %track.id,
        title = %track.title,
        duration_secs,
        "imported track"
    );
    Ok(track)
}

/// Import every path in order, stopping at the first failure.
pub fn import_files<P: AsRef<Path>>(
    paths: &[P],
    blobs: &dyn AudioBlobStore,
    catalog: &MemoryCatalog,
) -> Result<Vec<Track>> {
    paths
        .iter()
        .map(|p| import_file(p.as_ref(), blobs, catalog))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlobStore, TrackCatalog};

    fn write_wav(path: &Path, secs: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(secs * 8_000.0) as usize {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn import_stores_blob_and_catalog_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Slow Waltz.wav");
        write_wav(&path, 2.0);

        let blobs = MemoryBlobStore::new();
        let catalog = MemoryCatalog::new();
        let track = import_file(&path, &blobs, &catalog).unwrap();

        assert_eq!(track.title, "Slow Waltz");
        assert_eq!(track.format_hint.as_deref(), Some("wav"));
        assert!((track.duration_secs - 2.0).abs() < 0.01);
        assert_eq!(catalog.get_track(&track.id), Some(track.clone()));
        assert_eq!(blobs.get_audio_blob(&track.id).unwrap(), std::fs::read(&path).unwrap());
    }

    #[test]
    fn unreadable_file_is_rejected_before_storing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not audio").unwrap();

        let catalog = MemoryCatalog::new();
        assert!(import_files(&[&path], &MemoryBlobStore::new(), &catalog).is_err());
        assert!(catalog.is_empty());
    }
}
