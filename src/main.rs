//! frame-cache: maintenance tool for the on-disk animation frame cache.
//!
//! Runs janitor sweeps on demand or on a schedule, and lists what the cache
//! directory currently holds.

use std::sync::Arc;
use std::time::SystemTime;

use clap::Parser;
use tracing::info;

use frame_cache::cache::janitor::{list_entries, sweep_at};
use frame_cache::cache::FrameCache;
use frame_cache::config::{Cli, Command, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "frame_cache=debug"
    } else {
        "frame_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("frame-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(dir) = cli.cache_dir {
        config.cache.cache_dir = dir;
    }
    let config = Arc::new(config);

    info!(
        cache_dir = %config.cache.cache_dir.display(),
        codec = %config.compression.codec,
        sweep_interval_secs = config.janitor.sweep_interval_secs,
        "Configuration loaded"
    );

    match cli.command {
        Command::Sweep => {
            let report = sweep_at(&config.cache.cache_dir, SystemTime::now()).await;
            info!(
                scanned = report.scanned,
                expired = report.expired,
                orphaned = report.orphaned,
                kept = report.kept,
                failed = report.failed,
                "Sweep complete"
            );
        }
        Command::List => {
            let now = SystemTime::now();
            let entries = list_entries(&config.cache.cache_dir).await;
            for entry in &entries {
                let expires = match entry.expires_in(now) {
                    Some(left) => format!("{}s", left.as_secs()),
                    None => "expired".to_string(),
                };
                println!(
                    "{}  {:>5}  {:>10} B/frame  {:>10} B on disk  expires in {}",
                    entry.stem, entry.codec, entry.buffer_size, entry.size_bytes, expires
                );
            }
            info!(pairs = entries.len(), "Listed cache");
        }
        Command::Watch => {
            let mut cache = FrameCache::new(config.clone())?;
            cache.start_janitor();
            tokio::signal::ctrl_c().await?;
            info!("Interrupted, stopping janitor");
            cache.stop().await;
        }
    }

    Ok(())
}
