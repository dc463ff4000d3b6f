//! `deck`: a command-line rehearsal player.
//!
//! ## Modes
//! - `play`: import files into the local library, queue them and play through
//!   the queue with an optional tempo change.
//! - `queue`: print the saved queue.
//! - `devices`: list output devices.

mod cli;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use deck_engine::{AudioEngine, EngineEvent};
use deck_player::import::import_files;
use deck_player::storage::{DirBlobStore, JsonQueueFile, MemoryCatalog, QueuePersistence, TrackCatalog};
use deck_player::{PlaybackIntentStore, PlayerConfig, QueueStore, SyncBridge};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};

/// How long the player may sit idle (not playing, not loading) before `play` exits.
const IDLE_EXIT_AFTER: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,deck_player=info,deck_engine=info")
        }))
        .init();

    let mut cfg = PlayerConfig::load_or_default(args.config.as_deref())?;
    if args.device.is_some() {
        cfg.device = args.device.clone();
    }

    match args.cmd {
        Command::Play {
            files,
            tempo,
            volume,
            no_autoplay,
        } => run_play(cfg, &files, tempo, volume, no_autoplay),
        Command::Queue => print_queue(&cfg),
        Command::Devices => print_devices(),
    }
}

fn run_play(
    cfg: PlayerConfig,
    files: &[std::path::PathBuf],
    tempo: Option<f64>,
    volume: Option<f64>,
    no_autoplay: bool,
) -> Result<()> {
    let blobs = Arc::new(DirBlobStore::open(&cfg.storage.library_dir).with_context(|| {
        format!("open audio library {:?}", cfg.storage.library_dir)
    })?);
    let catalog = Arc::new(
        MemoryCatalog::load_json(&cfg.storage.catalog_file)
            .with_context(|| format!("read catalog {:?}", cfg.storage.catalog_file))?,
    );
    let tracks = import_files(files, blobs.as_ref(), &catalog)?;
    catalog
        .save_json(&cfg.storage.catalog_file)
        .with_context(|| format!("write catalog {:?}", cfg.storage.catalog_file))?;

    let queue = QueueStore::new(Arc::new(JsonQueueFile::new(&cfg.storage.queue_file)));
    queue.clear_queue();
    queue.set_autoplay(cfg.autoplay && !no_autoplay);
    queue.add_multiple_to_queue(tracks.iter().map(|t| t.id.clone()));

    let intent = PlaybackIntentStore::new();
    intent.set_volume(volume.unwrap_or(cfg.volume));
    intent.play();

    let engine = AudioEngine::with_cpal(cfg.engine.clone(), cfg.device.clone());
    engine.initialize().context("open audio output")?;
    let events = engine.subscribe();

    let bridge = SyncBridge::new(
        engine.clone(),
        intent.clone(),
        queue.clone(),
        blobs,
        catalog,
        cfg.bridge.clone(),
    )
    .spawn()
    .context("start sync bridge")?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let mut idle_since: Option<Instant> = None;
    loop {
        let mut interrupted = false;
        select! {
            recv(stop_rx) -> _ => interrupted = true,
            recv(events) -> msg => match msg {
                Ok(EngineEvent::Loaded { duration }) => {
                    let state = intent.snapshot();
                    tracing::info!(
                        title = state.current_track.as_ref().map(|t| t.title.as_str()).unwrap_or(""),
                        duration_secs = duration,
                        "now loaded"
                    );
                    // Loading a track resets its tempo; reapply the requested one.
                    if let Some(tempo) = tempo {
                        intent.set_tempo_multiplier(tempo);
                    }
                }
                Ok(EngineEvent::Error { cause }) => tracing::warn!(%cause, "playback error"),
                Ok(_) => {}
                Err(_) => interrupted = true,
            },
            default(Duration::from_millis(250)) => {}
        }
        if interrupted {
            tracing::info!("stopping playback");
            break;
        }

        let state = intent.snapshot();
        if state.is_playing || state.is_loading {
            idle_since = None;
        } else if idle_since.get_or_insert_with(Instant::now).elapsed() >= IDLE_EXIT_AFTER {
            if let Some(err) = state.last_error {
                tracing::warn!(error = %err, "player idle after error");
            }
            break;
        }
    }

    bridge.detach();
    engine.dispose();
    Ok(())
}

fn print_queue(cfg: &PlayerConfig) -> Result<()> {
    let saved = JsonQueueFile::new(&cfg.storage.queue_file)
        .load_queue_state()
        .with_context(|| format!("read queue {:?}", cfg.storage.queue_file))?;
    let catalog = MemoryCatalog::load_json(&cfg.storage.catalog_file)
        .with_context(|| format!("read catalog {:?}", cfg.storage.catalog_file))?;

    if saved.entries.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    for (i, entry) in saved.entries.iter().enumerate() {
        let marker = if saved.current_index == Some(i) { ">" } else { " " };
        let title = catalog
            .get_track(&entry.track_id)
            .map(|t| t.title)
            .unwrap_or_else(|| format!("<missing {}>", entry.track_id));
        println!("{marker} {i:>3}  {title}");
    }
    println!("autoplay: {}", if saved.autoplay { "on" } else { "off" });
    Ok(())
}

fn print_devices() -> Result<()> {
    for device in deck_engine::device::list_output_devices()? {
        let marker = if device.is_default { "*" } else { " " };
        println!(
            "{marker} {} ({}-{} Hz)",
            device.name, device.min_rate, device.max_rate
        );
    }
    Ok(())
}
