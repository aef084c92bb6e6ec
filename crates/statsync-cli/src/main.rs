//! statsync - command line front end for the dashboard data layer.
//!
//! Every subcommand goes through the same `Dashboard` facade a graphical
//! front end would use, so this doubles as a way to inspect the cache and
//! the offline queue on a real machine.

mod args;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use statsync_core::region::{LocationProvider, ResolveOptions, StaticLocationProvider};
use statsync_core::sync::FetchOptions;
use statsync_core::utils::format_bytes;
use statsync_core::{Config, Dashboard, RequestSpec, Resolution};

use args::{Cli, Commands, Dataset, FetchArgs, ResolveArgs};

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "statsync.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard must stay alive for file logs to be flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=statsync_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    if cli.offline {
        config.offline_mode = true;
    }
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref());
    info!("statsync starting");

    let config = load_config(&cli)?;
    let provider: Arc<dyn LocationProvider> = match cli.command {
        Commands::Resolve(ResolveArgs {
            lat: Some(lat),
            lon: Some(lon),
            accuracy,
            ..
        }) => Arc::new(StaticLocationProvider::at(lat, lon, accuracy)),
        // No platform location service here: only cached results can answer
        _ => Arc::new(StaticLocationProvider::unsupported()),
    };
    let dashboard = Dashboard::new(config, provider)?;

    let result = run(&dashboard, cli.command).await;
    dashboard.shutdown().await;
    result
}

async fn run(dashboard: &Dashboard, command: Commands) -> Result<()> {
    match command {
        Commands::Fetch(args) => fetch(dashboard, args).await,
        Commands::Resolve(args) => resolve(dashboard, args).await,
        Commands::Status => {
            let status = dashboard.cache_status();
            let queue = dashboard.sync().queue();
            print_json(&json!({
                "online": dashboard.is_online(),
                "cache": status,
                "used": format_bytes(status.used_bytes),
                "available": format_bytes(status.available_bytes),
                "last_sync": status.last_sync_display(),
                "queued_requests": queue.len(),
                "preferred_region": dashboard.user_prefs().preferred_region,
            }))
        }
        Commands::Clear { keep_prefs } => {
            let removed = dashboard.clear_cache(keep_prefs);
            print_json(&json!({ "removed": removed }))
        }
        Commands::Drain => {
            let report = dashboard.replay_queue().await;
            print_json(&json!({
                "replayed": report.replayed,
                "retained": report.retained,
                "dropped": report.dropped,
                "remaining": dashboard.sync().queue().len(),
            }))
        }
        Commands::Warm => {
            let fetched = dashboard.warm_cache().await;
            print_json(&json!({ "fetched": fetched, "cache": dashboard.cache_status() }))
        }
        Commands::Select { code } => match dashboard.select_region(&code) {
            Some(region) => print_json(&region),
            None => bail!("Unknown region code: {}", code),
        },
    }
}

async fn fetch(dashboard: &Dashboard, args: FetchArgs) -> Result<()> {
    let mut spec = match args.dataset {
        Dataset::All => RequestSpec::all_data(),
        Dataset::Regions => RequestSpec::regions(),
        Dataset::Region { ref code } => RequestSpec::region_data(code),
        Dataset::Health => RequestSpec::health(),
    };
    if let Some(year) = args.year {
        spec = spec.with_param("year", year);
    }
    let mut options = FetchOptions::for_consumer("cli");
    if let Some(secs) = args.max_age {
        options = options.with_max_age(chrono::Duration::seconds(secs.max(0)));
    }

    let outcome = dashboard.fetch_data(&spec, options).await?;
    if let Some(label) = outcome.failure {
        eprintln!("{}", label.message());
    }
    print_json(&outcome)
}

async fn resolve(dashboard: &Dashboard, args: ResolveArgs) -> Result<()> {
    let options = ResolveOptions {
        high_accuracy: !args.low_accuracy,
        ..ResolveOptions::default()
    };
    match dashboard.resolve_region(options).await? {
        Resolution::Resolved(result) => print_json(&result),
        Resolution::OutsideKnownRegion => print_json(&json!({ "outside_known_region": true })),
    }
}
