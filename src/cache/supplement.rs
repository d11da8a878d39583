//! Per-animation cache façade used by the renderer and player.
//!
//! Each supplement owns a private worker thread. The worker constructs the
//! [`FrameStore`] and [`DeltaCompressor`] itself and is the only code that
//! ever touches them; the supplement talks to it exclusively through a
//! command channel. Commands run strictly in submission order, so a read
//! queued after a write for the same frame sees that write.
//!
//! ```text
//! render thread                      worker thread
//! ─────────────                      ─────────────
//! add_frame ──── AddFrame ────────▶  encode → store.write
//! read_frame ─── ReadFrame ───────▶  store.read → decode
//!    ◀─────────── oneshot reply ───
//! mark_finished ─ MarkFinished ───▶  map.mark_all_finalized
//! ```
//!
//! `read_frame` blocks on a oneshot reply and therefore must not be called
//! from inside an async task.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::cache::compressor::{CompressionError, DeltaCompressor};
use crate::cache::identity::CacheIdentity;
use crate::cache::index::{AnimationInfo, FrameNumber};
use crate::cache::store::{FrameStore, StoreStats};

/// One rasterized frame, shared cheaply between the caller and the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub index: FrameNumber,
    pub data: Arc<[u8]>,
}

impl RawFrame {
    pub fn new(index: FrameNumber, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Lifecycle of a supplement's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplementState {
    /// Nothing stored or submitted yet.
    Empty,
    /// Frames are being written; reads always miss.
    Populating,
    /// A full pass completed; reads are served.
    Finalized,
}

/// What the worker found on disk when it opened the store.
#[derive(Debug, Default)]
struct OpenedState {
    finalized: bool,
    frames: Vec<FrameNumber>,
    info: Option<AnimationInfo>,
}

/// Worker's answer to a frame read.
#[derive(Debug)]
enum ReadOutcome {
    Hit(Vec<u8>),
    Miss,
    /// The stored blob was unusable and its descriptor was dropped.
    Dropped,
}

enum Command {
    AddFrame {
        previous: Option<RawFrame>,
        current: RawFrame,
    },
    ReadFrame {
        previous: Option<RawFrame>,
        frame: FrameNumber,
        reply: oneshot::Sender<ReadOutcome>,
    },
    MarkFinished,
    SetInfo(AnimationInfo),
    Stats {
        reply: oneshot::Sender<Option<StoreStats>>,
    },
    Close,
}

/// Frame cache for one animation rendition.
pub struct FrameCacheSupplement {
    identity: CacheIdentity,
    commands: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
    /// Frames submitted this session or found in the index on open.
    seen: RefCell<HashSet<FrameNumber>>,
    finished: bool,
    info: Option<AnimationInfo>,
}

impl FrameCacheSupplement {
    /// Open the cache for `identity` inside `dir`.
    ///
    /// Blocks until the worker has loaded the index. Never fails: if the
    /// files cannot be opened the supplement simply misses on every read.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context, since
    /// it blocks on the worker's reply.
    pub fn open(dir: &Path, identity: CacheIdentity, zstd_level: i32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = oneshot::channel();

        let worker = Worker::new(dir, identity.clone(), zstd_level);
        let spawned = std::thread::Builder::new()
            .name(format!("frame-cache-{}", &identity.key_hash()[..8]))
            .spawn(move || worker.run(rx, opened_tx));

        let (commands, worker) = match spawned {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(e) => {
                warn!(identity = %identity, "Could not spawn frame cache worker: {e}");
                (None, None)
            }
        };
        let opened = opened_rx.blocking_recv().unwrap_or_default();

        debug!(
            identity = %identity,
            frames = opened.frames.len(),
            finalized = opened.finalized,
            "Opened frame cache supplement"
        );

        Self {
            identity,
            commands,
            worker,
            seen: RefCell::new(opened.frames.into_iter().collect()),
            finished: opened.finalized,
            info: opened.info,
        }
    }

    pub fn identity(&self) -> &CacheIdentity {
        &self.identity
    }

    /// Queue `current` for encoding and storage. Returns immediately.
    ///
    /// Frames already seen are ignored. Once [`initialize`](Self::initialize)
    /// has recorded the frame range, seeing every frame of it finishes the cache.
    pub fn add_frame(&mut self, previous: Option<&RawFrame>, current: &RawFrame) {
        if !self.seen.get_mut().insert(current.index) {
            return;
        }
        self.send(Command::AddFrame {
            previous: previous.cloned(),
            current: current.clone(),
        });
        self.finish_if_complete();
    }

    /// Fetch a cached frame, blocking until the worker answers.
    ///
    /// `None` means "render it live": the frame is unknown, the cache is not
    /// finished yet, or the stored blob could not be read. A frame whose blob
    /// was unusable is forgotten, so the next `add_frame` for it stores it again.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn read_frame(&self, previous: Option<&RawFrame>, frame: FrameNumber) -> Option<RawFrame> {
        if !self.finished || !self.seen.borrow().contains(&frame) {
            return None;
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReadFrame {
            previous: previous.cloned(),
            frame,
            reply,
        });
        match rx.blocking_recv() {
            Ok(ReadOutcome::Hit(data)) => Some(RawFrame::new(frame, data)),
            Ok(ReadOutcome::Dropped) => {
                self.seen.borrow_mut().remove(&frame);
                None
            }
            Ok(ReadOutcome::Miss) | Err(_) => None,
        }
    }

    /// Record that a full pass has been written. Subsequent reads are served.
    pub fn mark_finished(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.send(Command::MarkFinished);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn state(&self) -> SupplementState {
        if self.finished {
            SupplementState::Finalized
        } else if self.seen.borrow().is_empty() {
            SupplementState::Empty
        } else {
            SupplementState::Populating
        }
    }

    /// Store playback metadata alongside the index.
    pub fn initialize(&mut self, info: AnimationInfo) {
        self.info = Some(info);
        self.send(Command::SetInfo(info));
        self.finish_if_complete();
    }

    /// Playback metadata recorded by [`initialize`](Self::initialize), possibly in an earlier session.
    pub fn info(&self) -> Option<AnimationInfo> {
        self.info
    }

    /// Store counters, after every previously queued command has run.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn stats(&self) -> Option<StoreStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply });
        rx.blocking_recv().ok().flatten()
    }

    /// Finish once every frame of the recorded range has been seen.
    fn finish_if_complete(&mut self) {
        let Some(info) = self.info else {
            return;
        };
        if self.finished || info.frame_count() == 0 {
            return;
        }
        let seen = self.seen.get_mut();
        if (seen.len() as u64) < info.frame_count() || !info.frames().all(|f| seen.contains(&f)) {
            return;
        }
        debug!(identity = %self.identity, end_frame = info.end_frame, "Full pass seen");
        self.mark_finished();
    }

    fn send(&self, command: Command) {
        if let Some(commands) = &self.commands {
            if commands.send(command).is_err() {
                debug!(identity = %self.identity, "Frame cache worker is gone, dropping command");
            }
        }
    }
}

impl Drop for FrameCacheSupplement {
    fn drop(&mut self) {
        self.send(Command::Close);
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(identity = %self.identity, "Frame cache worker panicked");
            }
        }
    }
}

/// State owned by the worker thread. Nothing outside the thread can reach it.
struct Worker {
    identity: CacheIdentity,
    index_path: PathBuf,
    data_path: PathBuf,
    zstd_level: i32,
}

impl Worker {
    fn new(dir: &Path, identity: CacheIdentity, zstd_level: i32) -> Self {
        Self {
            index_path: identity.index_path(dir),
            data_path: identity.data_path(dir),
            identity,
            zstd_level,
        }
    }

    fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        opened: oneshot::Sender<OpenedState>,
    ) {
        let store = match FrameStore::open(self.index_path.clone(), self.data_path.clone()) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(identity = %self.identity, "Frame cache disabled, could not open store: {e}");
                None
            }
        };
        let compressor = match DeltaCompressor::new(
            self.identity.codec(),
            self.zstd_level,
            self.identity.buffer_size(),
        ) {
            Ok(compressor) => Some(compressor),
            Err(e) => {
                warn!(identity = %self.identity, "Frame cache disabled: {e}");
                None
            }
        };

        let (Some(mut store), Some(mut compressor)) = (store, compressor) else {
            let _ = opened.send(OpenedState::default());
            // Keep draining so callers never block on a dead channel.
            while let Some(command) = commands.blocking_recv() {
                match command {
                    Command::ReadFrame { reply, .. } => {
                        let _ = reply.send(ReadOutcome::Miss);
                    }
                    Command::Stats { reply } => {
                        let _ = reply.send(None);
                    }
                    Command::Close => break,
                    _ => {}
                }
            }
            return;
        };

        let _ = opened.send(OpenedState {
            finalized: store.is_finalized(),
            frames: store.map().frames().collect(),
            info: store.info(),
        });

        while let Some(command) = commands.blocking_recv() {
            match command {
                Command::AddFrame { previous, current } => {
                    add_frame(&mut store, &mut compressor, previous.as_ref(), &current);
                }
                Command::ReadFrame {
                    previous,
                    frame,
                    reply,
                } => {
                    let _ = reply.send(read_frame(
                        &mut store,
                        &compressor,
                        previous.as_ref(),
                        frame,
                    ));
                }
                Command::MarkFinished => {
                    store.mark_finalized(true);
                    info!(
                        identity = %self.identity,
                        frames = store.map().len(),
                        "Frame cache finalized"
                    );
                }
                Command::SetInfo(info) => store.set_info(info),
                Command::Stats { reply } => {
                    let _ = reply.send(Some(store.stats().clone()));
                }
                Command::Close => break,
            }
        }
        // Dropping the store persists the index.
    }
}

fn add_frame(
    store: &mut FrameStore,
    compressor: &mut DeltaCompressor,
    previous: Option<&RawFrame>,
    current: &RawFrame,
) {
    if store.contains(current.index) {
        return;
    }
    let blob = match compressor.encode(previous.map(RawFrame::bytes), current.bytes()) {
        Ok(blob) => blob,
        Err(e) => {
            warn!(frame = current.index, "Frame encode failed: {e}");
            return;
        }
    };
    if let Err(e) = store.write(current.index, &blob) {
        warn!(frame = current.index, "Frame write failed: {e}");
    }
}

fn read_frame(
    store: &mut FrameStore,
    compressor: &DeltaCompressor,
    previous: Option<&RawFrame>,
    frame: FrameNumber,
) -> ReadOutcome {
    let blob = match store.read(frame) {
        Ok(blob) => blob,
        Err(e) => {
            debug!(frame, "Frame cache miss: {e}");
            // A frame no longer indexed, e.g. a truncated blob, can be stored again.
            return if store.contains(frame) {
                ReadOutcome::Miss
            } else {
                ReadOutcome::Dropped
            };
        }
    };
    match compressor.decode(previous.map(RawFrame::bytes), &blob) {
        Ok(data) => ReadOutcome::Hit(data),
        Err(CompressionError::MissingReference) => {
            debug!(frame, "Frame cache miss: delta blob needs the previous frame");
            ReadOutcome::Miss
        }
        Err(e) => {
            warn!(frame, "Stored frame failed to decode: {e}");
            store.forget(frame);
            ReadOutcome::Dropped
        }
    }
}
