//! Configuration loading and parsing.
//!
//! Defines the player config schema and resolves defaults. Every table is
//! optional; a missing file means all defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deck_engine::EngineConfig;
use serde::Deserialize;

/// Top-level player configuration loaded from TOML.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Audio engine tuning (`[engine]`).
    pub engine: EngineConfig,
    /// Reconciliation thresholds (`[bridge]`).
    pub bridge: BridgeConfig,
    /// Where audio, the catalog and the queue live (`[storage]`).
    pub storage: StorageConfig,
    /// Output device name substring; the host default when unset.
    pub device: Option<String>,
    /// Advance through the queue when a track ends.
    pub autoplay: bool,
    /// Initial volume, 0..1.
    pub volume: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            bridge: BridgeConfig::default(),
            storage: StorageConfig::default(),
            device: None,
            autoplay: true,
            volume: 1.0,
        }
    }
}

/// Sync bridge thresholds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Position jumps larger than this are user seeks; smaller ones are poll echoes.
    pub seek_threshold_secs: f64,
    /// Give up an autoplay chain after this many failed loads in a row.
    /// Unset means the queue length at the time of failure.
    pub max_consecutive_skips: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            seek_threshold_secs: 0.5,
            max_consecutive_skips: None,
        }
    }
}

/// On-disk locations used by the `deck` binary.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding imported audio blobs.
    pub library_dir: PathBuf,
    /// JSON track catalog.
    pub catalog_file: PathBuf,
    /// JSON queue snapshot.
    pub queue_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = PathBuf::from("deck-data");
        Self {
            library_dir: root.join("library"),
            catalog_file: root.join("catalog.json"),
            queue_file: root.join("queue.json"),
        }
    }
}

impl PlayerConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<PlayerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Load `path` when given and present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                tracing::info!(path = ?path, "config file not found; using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}
