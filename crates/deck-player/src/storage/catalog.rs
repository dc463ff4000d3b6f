use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use deck_types::Track;

use super::StorageError;

/// Read access to the track library.
pub trait TrackCatalog: Send + Sync {
    /// The track, or `None` if it was deleted from the library.
    fn get_track(&self, track_id: &str) -> Option<Track>;
}

/// Library held in memory, optionally backed by a JSON file.
#[derive(Default)]
pub struct MemoryCatalog {
    tracks: RwLock<HashMap<String, Track>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let catalog = Self::new();
        for track in tracks {
            catalog.insert(track);
        }
        catalog
    }

    pub fn insert(&self, track: Track) {
        if let Ok(mut tracks) = self.tracks.write() {
            tracks.insert(track.id.clone(), track);
        }
    }

    pub fn remove(&self, track_id: &str) -> Option<Track> {
        self.tracks.write().ok().and_then(|mut t| t.remove(track_id))
    }

    pub fn len(&self) -> usize {
        self.tracks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a catalog written by [`save_json`](Self::save_json). A missing file is an empty library.
    pub fn load_json(path: &Path) -> Result<Self, StorageError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let tracks: Vec<Track> = serde_json::from_str(&raw)?;
                Ok(Self::from_tracks(tracks))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_json(&self, path: &Path) -> Result<(), StorageError> {
        let mut tracks: Vec<Track> = self
            .tracks
            .read()
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        tracks.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&tracks)?)?;
        Ok(())
    }
}

impl TrackCatalog for MemoryCatalog {
    fn get_track(&self, track_id: &str) -> Option<Track> {
        self.tracks.read().ok()?.get(track_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let catalog = MemoryCatalog::new();
        catalog.insert(Track::new("a", 10.0));
        assert_eq!(catalog.get_track("a").map(|t| t.duration_secs), Some(10.0));
        assert!(catalog.remove("a").is_some());
        assert!(catalog.get_track("a").is_none());
        assert!(catalog.is_empty());
    }

    #[test]
    fn json_roundtrip_keeps_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = MemoryCatalog::from_tracks([
            Track {
                title: "Bolero".to_string(),
                bpm: Some(72.0),
                ..Track::new("b", 200.0)
            },
            Track::new("a", 90.0),
        ]);
        catalog.save_json(&path).unwrap();

        let loaded = MemoryCatalog::load_json(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get_track("b").and_then(|t| t.bpm), Some(72.0));
    }

    #[test]
    fn missing_catalog_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = MemoryCatalog::load_json(&dir.path().join("none.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
