use clap::{Parser, Subcommand};
use feedplay_core::PlatformProfile;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "feedplay")]
#[command(author, version, about = "Playback lifecycle and prefetch engine for video feeds")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Warm manifests and report their prefetch status
    Warm {
        /// Manifest URLs to warm
        #[arg(required = true)]
        urls: Vec<String>,

        /// Skip the segment range reads (manifest only)
        #[arg(long)]
        manifest_only: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drive an engine through a scroll sequence over the given manifests
    Simulate {
        /// Manifest URLs, one feed item each, in feed order
        #[arg(required = true)]
        urls: Vec<String>,

        /// Indices to visit, in order
        #[arg(long, value_delimiter = ',', default_value = "0,1,2")]
        steps: Vec<usize>,

        /// Time spent on each item, in milliseconds
        #[arg(long, default_value = "1500")]
        dwell_ms: u64,

        /// Simulated latency of each play call, in milliseconds
        #[arg(long, default_value = "100")]
        play_latency_ms: u64,

        /// Treat the network as unmetered (enables the low-priority tier)
        #[arg(long)]
        unmetered: bool,

        /// Use the tuned engine defaults of a platform (ios, android, desktop)
        #[arg(long)]
        platform: Option<PlatformProfile>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    ShowConfig {
        /// Apply the tuned engine defaults of a platform (ios, android, desktop)
        #[arg(long)]
        platform: Option<PlatformProfile>,
    },

    /// Display version information
    Version,
}
