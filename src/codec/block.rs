//! Level 2 block compression.
//!
//! General-purpose byte compressors applied to a framed block. The kind is
//! part of the series configuration and is never inferred from the payload.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{EdgeError, Result};

/// Zstd compression level used for blocks.
pub const ZSTD_LEVEL: i32 = 3;

/// Configured Level 2 codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockCodecKind {
    /// Stored as is.
    #[default]
    None,
    /// LZ4 block format with a prepended uncompressed size.
    Lz4,
    /// Zstandard frame.
    Zstd,
    /// Snappy raw format.
    Snappy,
    /// Gzip stream.
    Gzip,
}

impl BlockCodecKind {
    /// All block codec kinds.
    pub const ALL: [BlockCodecKind; 5] = [
        Self::None,
        Self::Lz4,
        Self::Zstd,
        Self::Snappy,
        Self::Gzip,
    ];

    /// Compresses `data`. Empty input yields empty output.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| compression(self, e)),
            Self::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| compression(self, e)),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data).map_err(|e| compression(self, e))?;
                encoder.finish().map_err(|e| compression(self, e))
            }
        }
    }

    /// Decompresses `data`. Empty input yields empty output.
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => {
                lz4_flex::decompress_size_prepended(data).map_err(|e| compression(self, e))
            }
            Self::Zstd => zstd::decode_all(data).map_err(|e| compression(self, e)),
            Self::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| compression(self, e)),
            Self::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| compression(self, e))?;
                Ok(out)
            }
        }
    }
}

impl fmt::Display for BlockCodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::Lz4 => "Lz4",
            Self::Zstd => "Zstd",
            Self::Snappy => "Snappy",
            Self::Gzip => "Gzip",
        };
        f.write_str(name)
    }
}

fn compression(kind: BlockCodecKind, err: impl fmt::Display) -> EdgeError {
    EdgeError::Compression(format!("{}: {}", kind, err))
}
