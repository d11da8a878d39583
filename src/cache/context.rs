//! Application-level entry point to the frame cache.
//!
//! A [`FrameCache`] is built once at startup and held by the application.
//! It owns the configuration and the janitor, and hands out one
//! [`FrameCacheSupplement`] per animation rendition.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::cache::identity::{CacheIdentity, LiveTime};
use crate::cache::janitor::CacheJanitor;
use crate::cache::supplement::FrameCacheSupplement;
use crate::config::Config;

pub struct FrameCache {
    config: Arc<Config>,
    janitor: Option<CacheJanitor>,
}

impl FrameCache {
    /// Create the context, making sure the cache directory exists.
    pub fn new(config: Arc<Config>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.cache.cache_dir)?;
        Ok(Self {
            config,
            janitor: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache.cache_dir
    }

    /// Start the janitor on the current tokio runtime.
    ///
    /// Does nothing if it is already running or disabled in the configuration.
    pub fn start_janitor(&mut self) {
        if !self.config.janitor.enabled {
            info!("Cache janitor disabled by configuration");
            return;
        }
        if self.janitor.as_ref().is_some_and(CacheJanitor::is_running) {
            return;
        }
        self.janitor = Some(CacheJanitor::start(
            self.config.cache.cache_dir.clone(),
            self.config.janitor.sweep_interval(),
        ));
    }

    pub fn janitor_running(&self) -> bool {
        self.janitor.as_ref().is_some_and(CacheJanitor::is_running)
    }

    /// Identity for an animation under the configured codec.
    pub fn identity(&self, key: &str, buffer_size: usize, live_time: LiveTime) -> CacheIdentity {
        CacheIdentity::new(key, buffer_size, live_time, self.config.compression.codec)
    }

    /// Open the cache for one animation rendition. Blocks while its index loads.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context, such as
    /// a task on the runtime driving the janitor. Call it from a render thread
    /// or through `tokio::task::spawn_blocking`.
    pub fn supplement(
        &self,
        key: &str,
        buffer_size: usize,
        live_time: LiveTime,
    ) -> FrameCacheSupplement {
        FrameCacheSupplement::open(
            self.cache_dir(),
            self.identity(key, buffer_size, live_time),
            self.config.compression.zstd_level,
        )
    }

    /// Stop the janitor, if running, and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.stop().await;
        }
    }
}
