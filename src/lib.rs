//! frame-cache: on-disk, delta-compressed cache of rendered animation frames.
//!
//! Rasterizing a complex vector animation is expensive. The first time an
//! animation plays, every rendered frame is XORed against its predecessor,
//! compressed, and appended to a per-animation data file. Once a full pass
//! has been written, later plays stream frames back from disk instead of
//! re-rendering. A background janitor deletes cache files whose time-to-live
//! has elapsed.
//!
//! The cache is purely an optimization: every failure degrades to a miss and
//! the caller renders the frame live.

pub mod cache;
pub mod config;
