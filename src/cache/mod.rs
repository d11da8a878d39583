//! On-disk frame cache.
//!
//! This module contains the cache data structures and algorithms:
//! - [`index`]: FrameIndexMap, FrameDescriptor, AnimationInfo
//! - [`identity`]: CacheIdentity, LiveTime, file naming and parsing
//! - [`compressor`]: XOR delta encoding plus LZ4/zstd block compression
//! - [`store`]: FrameStore, the index/data file pair for one animation
//! - [`supplement`]: per-animation façade with its confinement worker
//! - [`janitor`]: TTL-based cleanup of the shared cache directory
//! - [`context`]: FrameCache, the application-level entry point

pub mod compressor;
pub mod context;
pub mod identity;
pub mod index;
pub mod janitor;
pub mod store;
pub mod supplement;

pub use compressor::{Codec, DeltaCompressor};
pub use context::FrameCache;
pub use identity::{CacheIdentity, LiveTime};
pub use index::{AnimationInfo, FrameDescriptor, FrameIndexMap, FrameNumber};
pub use janitor::{CacheJanitor, SweepReport};
pub use store::FrameStore;
pub use supplement::{FrameCacheSupplement, RawFrame, SupplementState};
