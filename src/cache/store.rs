//! On-disk storage for one animation's frame blobs.
//!
//! A store owns exactly two files: the serialized [`FrameIndexMap`] and an
//! append-only data file holding compressed blobs back to back. Read and
//! write handles are opened lazily and are never open at the same time.
//!
//! A store is deliberately `!Sync` and is meant to live on the single worker
//! thread that owns it; see [`crate::cache::supplement`].

use std::cell::Cell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::index::{AnimationInfo, FrameDescriptor, FrameIndexMap, FrameNumber};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Frame {0} is not in the index")]
    FrameNotFound(FrameNumber),

    #[error("Frame {0} is stored but the animation is not finalized")]
    NotFinalized(FrameNumber),

    #[error("Frame {frame} is truncated: expected {expected} bytes, read {actual}")]
    Truncated {
        frame: FrameNumber,
        expected: u64,
        actual: u64,
    },

    #[error("Index serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Store I/O counters.
#[derive(Debug, Default, Clone)]
pub struct StoreStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
    /// Descriptors dropped because their blob could not be read back.
    pub healed: u64,
}

/// Index + data file pair for one cache identity.
pub struct FrameStore {
    index_path: PathBuf,
    data_path: PathBuf,
    map: FrameIndexMap,
    reader: Option<File>,
    writer: Option<File>,
    stats: StoreStats,
    /// Opts out of `Sync`: a store is confined to the thread that owns it.
    _confined: PhantomData<Cell<()>>,
}

impl FrameStore {
    /// Open (creating if needed) the files at the given paths and load the index.
    ///
    /// An unreadable index never fails the open; it just starts the cache cold.
    pub fn open(index_path: PathBuf, data_path: PathBuf) -> Result<Self, StoreError> {
        for path in [&index_path, &data_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(path)?;
        }

        let bytes = match fs::read(&index_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %index_path.display(), "Could not read frame index: {e}");
                Vec::new()
            }
        };
        let mut map = FrameIndexMap::deserialize(&bytes);

        let mut stats = StoreStats::default();
        let data_len = fs::metadata(&data_path)?.len();
        let dropped = map.retain_within(data_len);
        if dropped > 0 {
            warn!(
                data = %data_path.display(),
                data_len,
                dropped,
                "Dropped index entries past the end of the data file"
            );
            stats.healed += dropped as u64;
        }

        debug!(
            index = %index_path.display(),
            frames = map.len(),
            finalized = map.is_finalized(),
            "Opened frame store"
        );

        Ok(Self {
            index_path,
            data_path,
            map,
            reader: None,
            writer: None,
            stats,
            _confined: PhantomData,
        })
    }

    /// Append a blob for `frame`. Writing a frame that is already indexed is a
    /// successful no-op and leaves the stored blob untouched.
    pub fn write(&mut self, frame: FrameNumber, bytes: &[u8]) -> Result<(), StoreError> {
        if self.map.contains(frame) {
            return Ok(());
        }

        self.reader = None;
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => OpenOptions::new().append(true).open(&self.data_path)?,
        };

        let offset = writer.seek(SeekFrom::End(0))?;
        writer.write_all(bytes)?;
        self.writer = Some(writer);

        self.map
            .insert(frame, FrameDescriptor::new(offset, bytes.len() as u64));

        debug!(frame, offset, size = bytes.len(), "Wrote frame blob");
        self.stats.total_writes += 1;
        self.stats.total_bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Read the blob for `frame`. Only finalized animations are served.
    ///
    /// A blob shorter than its descriptor claims is treated as corruption:
    /// the descriptor is dropped so the frame is re-rendered and never retried.
    pub fn read(&mut self, frame: FrameNumber) -> Result<Vec<u8>, StoreError> {
        let descriptor = *self
            .map
            .get(frame)
            .ok_or(StoreError::FrameNotFound(frame))?;
        if !self.map.is_finalized() || !descriptor.finalized {
            return Err(StoreError::NotFinalized(frame));
        }

        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => File::open(&self.data_path)?,
        };

        reader.seek(SeekFrom::Start(descriptor.offset))?;
        // The length comes from disk; let the read itself bound the allocation.
        let mut buf = Vec::new();
        let actual = (&mut reader).take(descriptor.length).read_to_end(&mut buf)? as u64;
        self.reader = Some(reader);
        if actual != descriptor.length {
            self.forget(frame);
            return Err(StoreError::Truncated {
                frame,
                expected: descriptor.length,
                actual,
            });
        }

        self.stats.total_reads += 1;
        self.stats.total_bytes_read += actual;
        Ok(buf)
    }

    /// Drop the descriptor for a frame whose blob is unusable.
    pub fn forget(&mut self, frame: FrameNumber) {
        if self.map.remove(frame).is_some() {
            warn!(frame, data = %self.data_path.display(), "Dropped corrupt frame from index");
            self.stats.healed += 1;
        }
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.map.contains(frame)
    }

    pub fn mark_finalized(&mut self, flag: bool) {
        self.map.mark_all_finalized(flag);
    }

    pub fn is_finalized(&self) -> bool {
        self.map.is_finalized()
    }

    pub fn set_info(&mut self, info: AnimationInfo) {
        self.map.set_info(info);
    }

    pub fn info(&self) -> Option<AnimationInfo> {
        self.map.info()
    }

    pub fn map(&self) -> &FrameIndexMap {
        &self.map
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Flush and close handles, persist the index and refresh both files'
    /// modification times so the janitor restarts their TTL.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let flushed = match self.writer.take() {
            Some(mut writer) => writer.flush().and_then(|_| writer.sync_data()),
            None => Ok(()),
        };
        self.reader = None;

        fs::write(&self.index_path, self.map.serialize()?)?;

        let now = SystemTime::now();
        for path in [&self.index_path, &self.data_path] {
            OpenOptions::new().write(true).open(path)?.set_modified(now)?;
        }
        flushed?;

        debug!(
            index = %self.index_path.display(),
            frames = self.map.len(),
            finalized = self.map.is_finalized(),
            writes = self.stats.total_writes,
            reads = self.stats.total_reads,
            "Closed frame store"
        );
        Ok(())
    }
}

impl Drop for FrameStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(index = %self.index_path.display(), "Failed to persist frame store: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_in(tmp: &TempDir) -> FrameStore {
        FrameStore::open(tmp.path().join("a-map"), tmp.path().join("a-data")).unwrap()
    }

    #[test]
    fn test_write_and_read_after_finalize() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_in(&tmp);

        store.write(0, b"first").unwrap();
        store.write(1, b"second blob").unwrap();
        store.mark_finalized(true);

        assert_eq!(store.read(1).unwrap(), b"second blob");
        assert_eq!(store.read(0).unwrap(), b"first");
        assert_eq!(store.stats().total_writes, 2);
        assert_eq!(store.stats().total_reads, 2);

        let d = store.map().get(1).unwrap();
        assert_eq!((d.offset, d.length), (5, 11));
    }

    #[test]
    fn test_open_creates_files() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("deep").join("dir");
        let store = FrameStore::open(nested.join("x-map"), nested.join("x-data")).unwrap();
        assert!(store.index_path().exists());
        assert!(store.data_path().exists());
        assert!(store.map().is_empty());
    }

    #[test]
    fn test_missing_frame() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_in(&tmp);
        store.mark_finalized(true);
        assert!(matches!(store.read(9), Err(StoreError::FrameNotFound(9))));
    }

    #[test]
    fn test_interleaved_read_write_handles() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_in(&tmp);
        store.mark_finalized(true);

        store.write(0, b"aaaa").unwrap();
        assert_eq!(store.read(0).unwrap(), b"aaaa");
        store.write(1, b"bbbb").unwrap();
        assert_eq!(store.read(1).unwrap(), b"bbbb");
        assert_eq!(store.read(0).unwrap(), b"aaaa");
    }
}
