//! Cache identity: deterministic naming of an animation's index/data pair.
//!
//! File names carry everything the janitor needs to decide expiry without
//! opening the files:
//!
//! ```text
//! fc{version}-{codec}-{buffer_size}-{ttl_secs}-{key_hash}-map
//! fc{version}-{codec}-{buffer_size}-{ttl_secs}-{key_hash}-data
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::compressor::Codec;

/// Bumped whenever the blob or index layout changes; older files become orphans.
pub const FORMAT_VERSION: u32 = 1;

const NAME_PREFIX: &str = "fc";
const MAP_SUFFIX: &str = "-map";
const DATA_SUFFIX: &str = "-data";

/// Hex digits of the BLAKE3 key hash kept in file names (128 bits).
const KEY_HASH_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Not a cache file name: {0}")]
    NotCacheFile(String),

    #[error("Cache file {name} has format version {found}, expected {FORMAT_VERSION}")]
    StaleVersion { name: String, found: u32 },
}

/// How long an animation's cache files may sit unused before deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveTime {
    /// Animations shown inline in a conversation.
    Chat,
    /// Sticker and emoji thumbnails.
    Thumb,
    /// Full-screen effects.
    Effect,
    /// Arbitrary TTL in seconds.
    Custom(u64),
}

impl LiveTime {
    pub fn as_secs(&self) -> u64 {
        match self {
            LiveTime::Chat => 3_600,
            LiveTime::Thumb => 259_200,
            LiveTime::Effect => 241_920,
            LiveTime::Custom(secs) => *secs,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// Which half of a cache pair a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Index,
    Data,
}

/// Stable identity of one cached animation rendition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    key_hash: String,
    buffer_size: usize,
    ttl_secs: u64,
    codec: Codec,
}

impl CacheIdentity {
    /// Derive an identity from the animation's cache key and frame geometry.
    pub fn new(key: &str, buffer_size: usize, live_time: LiveTime, codec: Codec) -> Self {
        let hash = blake3::hash(key.as_bytes());
        Self {
            key_hash: hash.to_hex()[..KEY_HASH_LEN].to_string(),
            buffer_size,
            ttl_secs: live_time.as_secs(),
            codec,
        }
    }

    /// Hex BLAKE3 digest of the cache key.
    pub fn key_hash(&self) -> &str {
        &self.key_hash
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Shared file-name stem without the `-map`/`-data` suffix.
    pub fn stem(&self) -> String {
        format!(
            "{NAME_PREFIX}{FORMAT_VERSION}-{}-{}-{}-{}",
            self.codec, self.buffer_size, self.ttl_secs, self.key_hash
        )
    }

    pub fn index_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{MAP_SUFFIX}", self.stem()))
    }

    pub fn data_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{DATA_SUFFIX}", self.stem()))
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// What the janitor learns from a cache file name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub stem: String,
    pub role: FileRole,
    pub codec: Codec,
    pub buffer_size: usize,
    pub ttl: Duration,
}

/// Parse a cache file name.
///
/// Names from another format version parse far enough to be recognised and
/// are reported as `StaleVersion` so callers can treat them as orphans.
pub fn parse_file_name(name: &str) -> Result<ParsedName, IdentityError> {
    let not_cache = || IdentityError::NotCacheFile(name.to_string());

    let (stem, role) = if let Some(stem) = name.strip_suffix(MAP_SUFFIX) {
        (stem, FileRole::Index)
    } else if let Some(stem) = name.strip_suffix(DATA_SUFFIX) {
        (stem, FileRole::Data)
    } else {
        return Err(not_cache());
    };

    let rest = stem.strip_prefix(NAME_PREFIX).ok_or_else(not_cache)?;
    let parts: Vec<&str> = rest.split('-').collect();
    let [version, codec, buffer_size, ttl, key_hash] = parts.as_slice() else {
        return Err(not_cache());
    };

    let version: u32 = version.parse().map_err(|_| not_cache())?;
    let codec: Codec = codec.parse().map_err(|_| not_cache())?;
    let buffer_size: usize = buffer_size.parse().map_err(|_| not_cache())?;
    let ttl_secs: u64 = ttl.parse().map_err(|_| not_cache())?;
    if key_hash.len() != KEY_HASH_LEN || !key_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(not_cache());
    }
    if version != FORMAT_VERSION {
        return Err(IdentityError::StaleVersion {
            name: name.to_string(),
            found: version,
        });
    }

    Ok(ParsedName {
        stem: stem.to_string(),
        role,
        codec,
        buffer_size,
        ttl: Duration::from_secs(ttl_secs),
    })
}
