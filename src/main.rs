// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use swingcast::constants::RecordingPreset;

mod cli;

#[derive(Parser)]
#[command(name = "swingcast")]
#[command(about = "Live capture, switching, and clip export for golf-simulator broadcast")]
#[command(version)]
struct Cli {
    /// Settings file (default: user config dir)
    #[arg(long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    Low,
    Medium,
    High,
}

impl From<PresetArg> for RecordingPreset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::Low => RecordingPreset::Low,
            PresetArg::Medium => RecordingPreset::Medium,
            PresetArg::High => RecordingPreset::High,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List configured capture devices
    List,

    /// Record the configured inputs for a fixed duration
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output directory
        #[arg(short, long, default_value = "recordings")]
        output: PathBuf,

        /// Quality preset
        #[arg(short, long, value_enum, default_value = "medium")]
        preset: PresetArg,

        /// Number of inputs to record
        #[arg(short, long, default_value = "2")]
        inputs: usize,
    },

    /// Run a golf session: record, auto-cut, and export swing clips
    Golf {
        /// Session duration in seconds (Ctrl-C ends early)
        #[arg(short, long, default_value = "3600")]
        duration: u64,

        /// Output directory
        #[arg(short, long, default_value = "sessions")]
        output: PathBuf,

        /// Golfer display name used in clip filenames and overlays
        #[arg(short, long, default_value = "Golfer")]
        name: String,

        /// Enable the audio impact detector
        #[arg(short, long)]
        audio: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("swingcast=info")),
        )
        .init();

    let args = Cli::parse();
    match args.command {
        Commands::List => cli::list_devices(args.settings),
        Commands::Record {
            duration,
            output,
            preset,
            inputs,
        } => cli::record(args.settings, output, duration, preset.into(), inputs).await,
        Commands::Golf {
            duration,
            output,
            name,
            audio,
        } => cli::golf(args.settings, output, duration, name, audio).await,
    }
}
