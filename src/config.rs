//! Runtime configuration for frame-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Cache location, codec choice and janitor scheduling live here.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::cache::compressor::Codec;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "frame-cache", about = "Maintenance tool for the on-disk animation frame cache")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "frame-cache.json")]
    pub config: PathBuf,

    /// Override the cache directory from the configuration file.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Maintenance subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a single janitor sweep and exit.
    Sweep,
    /// List cache pairs with their size and time to expiry.
    List,
    /// Run the janitor on its interval until interrupted.
    Watch,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache location.
    pub cache: CacheConfig,

    /// Frame compression settings.
    pub compression: CompressionConfig,

    /// Background cleanup settings.
    pub janitor: JanitorConfig,
}

/// Where cache files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared directory holding every `-map`/`-data` pair.
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("frame-cache"),
        }
    }
}

/// Compression settings for stored frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Block codec applied after delta encoding.
    pub codec: Codec,

    /// zstd compression level (1-22), used only with `Codec::Zstd`.
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Lz4,
            zstd_level: 1,
        }
    }
}

/// Janitor scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Start the janitor when the cache context starts it.
    pub enabled: bool,

    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 30 * 60,
        }
    }
}

impl JanitorConfig {
    /// Interval between sweeps, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
