use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "deck", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Player config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import audio files, queue them and play through the queue
    Play {
        /// Audio files, played in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tempo multiplier applied to every track (0.5 - 2.0)
        #[arg(long)]
        tempo: Option<f64>,

        /// Output volume (0.0 - 1.0)
        #[arg(long)]
        volume: Option<f64>,

        /// Stop after the first track instead of advancing through the queue
        #[arg(long)]
        no_autoplay: bool,
    },

    /// Print the saved queue
    Queue,

    /// List output devices
    Devices,
}
