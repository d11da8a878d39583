//! Janitor: periodically deletes cache files whose TTL has elapsed.
//!
//! Expiry is decided from the file name and modification time alone:
//!
//! ```text
//! expired(pair) = newest_mtime(pair) + ttl_from_name(pair) < now
//! ```
//!
//! Files that do not match the naming scheme, including files written by an
//! older format version, are orphans and are deleted on sight. Errors on any
//! single file are logged and skipped; a sweep never fails as a whole.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::compressor::Codec;
use crate::cache::identity::{parse_file_name, IdentityError};

/// Outcome of one sweep, counted in files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Regular files inspected.
    pub scanned: usize,
    /// Files deleted because their pair's TTL elapsed.
    pub expired: usize,
    /// Files deleted because they are not current cache files.
    pub orphaned: usize,
    /// Files left in place.
    pub kept: usize,
    /// Files that could not be inspected or deleted.
    pub failed: usize,
}

/// One index/data pair as seen on disk.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub stem: String,
    pub codec: Codec,
    pub buffer_size: usize,
    pub ttl: Duration,
    pub paths: Vec<PathBuf>,
    pub size_bytes: u64,
    /// Newest modification time across the pair's files.
    pub modified: SystemTime,
}

impl CacheEntry {
    /// Time left before the pair expires, `None` once it has.
    pub fn expires_in(&self, now: SystemTime) -> Option<Duration> {
        let deadline = self.modified.checked_add(self.ttl)?;
        deadline.duration_since(now).ok()
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.modified.checked_add(self.ttl) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }
}

/// Everything found in one directory scan.
#[derive(Debug, Default)]
struct Scan {
    entries: Vec<CacheEntry>,
    orphans: Vec<PathBuf>,
    scanned: usize,
    failed: usize,
}

async fn scan(dir: &Path) -> Scan {
    let mut result = Scan::default();

    let mut dir_entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "Cache directory not readable: {e}");
            return result;
        }
    };

    let mut pairs: HashMap<String, CacheEntry> = HashMap::new();
    loop {
        let entry = match dir_entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), "Cache directory listing failed: {e}");
                result.failed += 1;
                break;
            }
        };
        let path = entry.path();
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                // Usually a file removed between listing and inspection.
                debug!(path = %path.display(), "Could not stat cache file: {e}");
                result.failed += 1;
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        result.scanned += 1;

        let parsed = match entry.file_name().to_str().map(parse_file_name) {
            Some(Ok(parsed)) => parsed,
            Some(Err(IdentityError::StaleVersion { found, .. })) => {
                debug!(path = %path.display(), version = found, "Stale cache file");
                result.orphans.push(path);
                continue;
            }
            Some(Err(_)) | None => {
                result.orphans.push(path);
                continue;
            }
        };
        let modified = match meta.modified() {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %path.display(), "No modification time: {e}");
                result.failed += 1;
                continue;
            }
        };

        let pair = pairs.entry(parsed.stem.clone()).or_insert_with(|| CacheEntry {
            stem: parsed.stem,
            codec: parsed.codec,
            buffer_size: parsed.buffer_size,
            ttl: parsed.ttl,
            paths: Vec::new(),
            size_bytes: 0,
            modified: SystemTime::UNIX_EPOCH,
        });
        pair.paths.push(path);
        pair.size_bytes += meta.len();
        pair.modified = pair.modified.max(modified);
    }

    result.entries = pairs.into_values().collect();
    result.entries.sort_by(|a, b| a.stem.cmp(&b.stem));
    result
}

/// List the cache pairs currently in `dir`, sorted by name.
pub async fn list_entries(dir: &Path) -> Vec<CacheEntry> {
    scan(dir).await.entries
}

/// Run one sweep of `dir` as if the current time were `now`.
pub async fn sweep_at(dir: &Path, now: SystemTime) -> SweepReport {
    let scan = scan(dir).await;
    let mut report = SweepReport {
        scanned: scan.scanned,
        failed: scan.failed,
        ..Default::default()
    };

    for path in &scan.orphans {
        if remove(path).await {
            report.orphaned += 1;
        } else {
            report.failed += 1;
        }
    }

    for entry in &scan.entries {
        if !entry.is_expired(now) {
            report.kept += entry.paths.len();
            continue;
        }
        for path in &entry.paths {
            if remove(path).await {
                report.expired += 1;
            } else {
                report.failed += 1;
            }
        }
        debug!(stem = %entry.stem, ttl_secs = entry.ttl.as_secs(), "Expired cache pair");
    }

    report
}

/// Delete one file. A file that is already gone counts as deleted.
async fn remove(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), "Could not delete cache file: {e}");
            false
        }
    }
}

/// Recurring sweeper over one cache directory.
///
/// The first sweep runs immediately. Dropping the handle without calling
/// [`stop`](Self::stop) also ends the task, at its next wake-up.
pub struct CacheJanitor {
    dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CacheJanitor {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(dir: PathBuf, interval: Duration) -> Self {
        let (shutdown, mut stop_rx) = oneshot::channel();
        let task_dir = dir.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                dir = %task_dir.display(),
                interval_secs = interval.as_secs(),
                "Cache janitor started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = sweep_at(&task_dir, SystemTime::now()).await;
                        if report.expired + report.orphaned + report.failed > 0 {
                            info!(
                                scanned = report.scanned,
                                expired = report.expired,
                                orphaned = report.orphaned,
                                failed = report.failed,
                                "Cache sweep complete"
                            );
                        } else {
                            debug!(scanned = report.scanned, "Cache sweep found nothing to delete");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
            info!(dir = %task_dir.display(), "Cache janitor stopped");
        });

        Self {
            dir,
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Cache janitor task ended abnormally: {e}");
            }
        }
    }
}
