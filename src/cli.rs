use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vabrc::engine::{Codec, RcMode};

#[derive(Parser)]
#[command(name = "vabrc")]
#[command(about = "HRD-constrained bit-rate control for hardware H.264/HEVC encoders", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log rate-control decisions (repeat for per-transition tracing)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the initial per-layer rate-control state as JSON
    Init {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Run the encode-retry loop against a synthetic encoder
    Simulate {
        #[command(flatten)]
        config: ConfigArgs,

        /// Number of frames to encode
        #[arg(long, default_value_t = 300)]
        frames: u64,

        /// Seed for the size noise
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Content complexity multiplier (1.0 = nominal)
        #[arg(long, default_value_t = 1.0)]
        complexity: f64,

        /// Relative amplitude of per-encode size noise
        #[arg(long, default_value_t = 0.1)]
        noise: f64,

        /// Insert a scene change every N frames
        #[arg(long)]
        scene_change_every: Option<u64>,

        /// Append a line per frame to this file
        #[arg(long)]
        frame_log: Option<PathBuf>,

        /// Add this run to the lifetime statistics
        #[arg(long)]
        save_stats: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show lifetime simulation statistics
    Stats,

    /// Show config status and location, or create default config if missing
    InitConfig {
        /// Where to write the config (defaults to the user config dir)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Config file (defaults to the user config, or built-in defaults if missing)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the rate-control mode
    #[arg(long, value_enum)]
    pub mode: Option<RcMode>,

    /// Override the codec
    #[arg(long, value_enum)]
    pub codec: Option<Codec>,

    /// Override the top-layer bitrate in bits per second
    #[arg(long)]
    pub bitrate: Option<u64>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
