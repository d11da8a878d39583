//! Delta compression pipeline for rendered frames.
//!
//! Each frame is XORed against the previous frame (when there is one) and
//! the result is compressed with a fast block codec. Unchanged regions
//! between consecutive frames collapse to runs of zero bytes, which is where
//! nearly all of the size reduction comes from.
//!
//! Every blob starts with a one-byte header so a reader knows whether it
//! needs the previous frame:
//!
//! ```text
//! [flags: u8][codec payload ...]
//!  bit 0: delta (XORed against the previous frame)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame buffers are processed in machine words of this many bytes.
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

const FLAG_DELTA: u8 = 0b0000_0001;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),

    #[error("LZ4 decompression failed: {0}")]
    Lz4Error(#[from] lz4_flex::block::DecompressError),

    #[error("Frame buffer size {0} is not a multiple of {WORD_SIZE} bytes")]
    UnalignedBuffer(usize),

    #[error("Frame is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Blob is delta-encoded but no previous frame was supplied")]
    MissingReference,

    #[error("Blob is empty")]
    EmptyBlob,
}

/// Block codec applied after delta encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// LZ4 block format; fastest decode, the default.
    Lz4,
    /// zstd at a configurable level; smaller files, slower.
    Zstd,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Lz4 => write!(f, "lz4"),
            Codec::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lz4" => Ok(Codec::Lz4),
            "zstd" => Ok(Codec::Zstd),
            other => Err(format!("unknown codec: {other}")),
        }
    }
}

/// XOR `src` into `dst` one 64-bit word at a time.
///
/// Both slices must have the same length, a multiple of [`WORD_SIZE`].
/// Aligned buffers are reinterpreted as `u64` slices directly; unaligned ones
/// go through a chunked copy into registers.
pub fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "frame buffers differ in size");
    debug_assert_eq!(dst.len() % WORD_SIZE, 0);

    match (
        bytemuck::try_cast_slice_mut::<u8, u64>(dst),
        bytemuck::try_cast_slice::<u8, u64>(src),
    ) {
        (Ok(dst_words), Ok(src_words)) => {
            for (d, s) in dst_words.iter_mut().zip(src_words) {
                *d ^= *s;
            }
        }
        _ => {
            for (d, s) in dst
                .chunks_exact_mut(WORD_SIZE)
                .zip(src.chunks_exact(WORD_SIZE))
            {
                let mut lhs = [0u8; WORD_SIZE];
                let mut rhs = [0u8; WORD_SIZE];
                lhs.copy_from_slice(d);
                rhs.copy_from_slice(s);
                let word = u64::from_ne_bytes(lhs) ^ u64::from_ne_bytes(rhs);
                d.copy_from_slice(&word.to_ne_bytes());
            }
        }
    }
}

/// Encodes and decodes frame blobs for one fixed buffer size.
pub struct DeltaCompressor {
    codec: Codec,
    zstd_level: i32,
    buffer_size: usize,
    /// Reused XOR workspace, `buffer_size` bytes.
    scratch: Vec<u8>,
}

impl DeltaCompressor {
    /// Create a compressor for frames of exactly `buffer_size` bytes.
    pub fn new(codec: Codec, zstd_level: i32, buffer_size: usize) -> Result<Self, CompressionError> {
        if buffer_size == 0 || buffer_size % WORD_SIZE != 0 {
            return Err(CompressionError::UnalignedBuffer(buffer_size));
        }
        Ok(Self {
            codec,
            zstd_level,
            buffer_size,
            scratch: vec![0u8; buffer_size],
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Encode `current`, as a delta against `previous` when given.
    pub fn encode(
        &mut self,
        previous: Option<&[u8]>,
        current: &[u8],
    ) -> Result<Vec<u8>, CompressionError> {
        self.check_len(current.len())?;

        let (flags, payload) = match previous {
            Some(previous) => {
                self.check_len(previous.len())?;
                self.scratch.copy_from_slice(current);
                xor_in_place(&mut self.scratch, previous);
                (FLAG_DELTA, self.compress(&self.scratch)?)
            }
            None => (0, self.compress(current)?),
        };

        let mut blob = Vec::with_capacity(1 + payload.len());
        blob.push(flags);
        blob.extend_from_slice(&payload);
        Ok(blob)
    }

    /// Reconstruct a frame from a blob produced by [`encode`](Self::encode).
    pub fn decode(
        &self,
        previous: Option<&[u8]>,
        blob: &[u8],
    ) -> Result<Vec<u8>, CompressionError> {
        let (&flags, payload) = blob.split_first().ok_or(CompressionError::EmptyBlob)?;

        let mut frame = self.decompress(payload)?;
        self.check_len(frame.len())?;

        if flags & FLAG_DELTA != 0 {
            let previous = previous.ok_or(CompressionError::MissingReference)?;
            self.check_len(previous.len())?;
            xor_in_place(&mut frame, previous);
        }
        Ok(frame)
    }

    fn check_len(&self, actual: usize) -> Result<(), CompressionError> {
        if actual == self.buffer_size {
            Ok(())
        } else {
            Err(CompressionError::SizeMismatch {
                expected: self.buffer_size,
                actual,
            })
        }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self.codec {
            Codec::Lz4 => Ok(lz4_flex::block::compress(data)),
            Codec::Zstd => Ok(zstd::bulk::compress(data, self.zstd_level)?),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self.codec {
            Codec::Lz4 => Ok(lz4_flex::block::decompress(data, self.buffer_size)?),
            Codec::Zstd => Ok(zstd::bulk::decompress(data, self.buffer_size)?),
        }
    }
}
