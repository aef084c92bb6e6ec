//! Command line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// statsync - offline-resilient access to the program statistics API
#[derive(Parser, Debug)]
#[command(name = "statsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STATSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Treat the network as unavailable
    #[arg(long, global = true)]
    pub offline: bool,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a dataset (network, then cache, then fallback)
    Fetch(FetchArgs),

    /// Resolve coordinates to a region
    Resolve(ResolveArgs),

    /// Show cache usage and queue state
    Status,

    /// Clear cached data
    Clear {
        /// Keep user preferences
        #[arg(long)]
        keep_prefs: bool,
    },

    /// Replay requests queued while offline
    Drain,

    /// Fetch every dashboard dataset into the cache
    Warm,

    /// Remember a region as the preferred one
    Select {
        /// Region code, e.g. KL-TVM
        code: String,
    },
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(subcommand)]
    pub dataset: Dataset,

    /// Financial year filter, e.g. 2024-2025
    #[arg(long, global = true)]
    pub year: Option<String>,

    /// Ignore cached data older than this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub max_age: Option<i64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Dataset {
    /// Aggregate statistics for every region
    All,
    /// The region list
    Regions,
    /// Statistics for one region
    Region { code: String },
    /// Backend health
    Health,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Latitude in decimal degrees
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Reported accuracy of the fix in metres
    #[arg(long, default_value_t = 25.0)]
    pub accuracy: f64,

    /// Use the shorter low-accuracy timeout
    #[arg(long)]
    pub low_accuracy: bool,
}
