//! Key and value layouts for the ordered store.
//!
//! # Record keys
//!
//! ```text
//! [0x01][timestamp: u64 BE][series id bytes]
//! ```
//!
//! The timestamp is stored with its sign bit flipped, so byte order equals
//! chronological order for negative timestamps too. Records of different
//! series interleave by time; range scans filter by id.
//!
//! # Value records
//!
//! ```text
//! [value: f64 BE][quality: u8][metadata JSON]
//! ```
//!
//! # Block keys
//!
//! ```text
//! data/{TYPE}/{series:010}/{start:020}_{end:020}
//! ```
//!
//! `start` and `end` use the same sign-flipped encoding as record keys,
//! printed as zero-padded decimals, so a block's time range can be read
//! from its key without touching the payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::primitives::ByteReader;
use crate::error::{EdgeError, Result};

/// First byte of every record key.
pub const RECORD_PREFIX: u8 = 0x01;

/// Length of a record key without the series id.
pub const RECORD_KEY_HEADER: usize = 9;

/// Length of a value record without metadata.
pub const VALUE_RECORD_HEADER: usize = 9;

/// Maximum series id length in bytes.
pub const MAX_SERIES_ID_LEN: usize = 255;

/// Prefix of block keys.
pub const BLOCK_PREFIX: &str = "data/";

/// Prefix of persisted series configurations.
pub const SERIES_PREFIX: &str = "series/";

/// Key of the persisted series number counter.
pub const META_COUNTER: &str = "meta/counter";

const SIGN_BIT: u64 = 1 << 63;

/// Maps a timestamp to an unsigned value with the same ordering.
#[inline]
pub fn encode_timestamp(ts: i64) -> u64 {
    (ts as u64) ^ SIGN_BIT
}

/// Inverse of [`encode_timestamp`].
#[inline]
pub fn decode_timestamp(encoded: u64) -> i64 {
    (encoded ^ SIGN_BIT) as i64
}

/// Builds the key for one record of `series_id` at `ts`.
pub fn record_key(series_id: &str, ts: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECORD_KEY_HEADER + series_id.len());
    key.push(RECORD_PREFIX);
    key.extend_from_slice(&encode_timestamp(ts).to_be_bytes());
    key.extend_from_slice(series_id.as_bytes());
    key
}

/// Smallest record key at `ts`, for any series.
pub fn record_bound(ts: i64) -> Vec<u8> {
    record_key("", ts)
}

/// Splits a record key into its timestamp and series id.
pub fn decode_record_key(key: &[u8]) -> Result<(i64, &str)> {
    if key.len() < RECORD_KEY_HEADER {
        return Err(EdgeError::Corrupted(format!(
            "record key of {} bytes is shorter than {}",
            key.len(),
            RECORD_KEY_HEADER
        )));
    }
    if key[0] != RECORD_PREFIX {
        return Err(EdgeError::Corrupted(format!(
            "record key prefix {:#04x}",
            key[0]
        )));
    }
    let mut reader = ByteReader::new(&key[1..]);
    let ts = decode_timestamp(reader.read_u64_be()?);
    let id = std::str::from_utf8(reader.rest())
        .map_err(|e| EdgeError::Corrupted(format!("series id is not UTF-8: {}", e)))?;
    Ok((ts, id))
}

/// Data quality code carried by every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Quality {
    /// Trusted reading.
    #[default]
    Good = 0,
    /// Plausible but flagged.
    Suspect = 1,
    /// Known bad reading.
    Bad = 2,
    /// Not assessed.
    Unknown = 3,
}

impl Quality {
    /// Decodes a quality byte.
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Good),
            1 => Ok(Self::Suspect),
            2 => Ok(Self::Bad),
            3 => Ok(Self::Unknown),
            other => Err(EdgeError::Corrupted(format!("quality byte {}", other))),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Good => "Good",
            Self::Suspect => "Suspect",
            Self::Bad => "Bad",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Optional string metadata attached to a record.
pub type Metadata = BTreeMap<String, String>;

/// Stored value of one record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValueRecord {
    /// Reading.
    pub value: f64,
    /// Quality code.
    pub quality: Quality,
    /// Metadata, absent when empty.
    pub metadata: Option<Metadata>,
}

impl ValueRecord {
    /// Creates a record without metadata.
    pub fn new(value: f64, quality: Quality) -> Self {
        Self {
            value,
            quality,
            metadata: None,
        }
    }

    /// Serializes the record.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(VALUE_RECORD_HEADER);
        buf.extend_from_slice(&self.value.to_bits().to_be_bytes());
        buf.push(self.quality as u8);
        if let Some(metadata) = self.metadata.as_ref().filter(|m| !m.is_empty()) {
            serde_json::to_writer(&mut buf, metadata)?;
        }
        Ok(buf)
    }

    /// Deserializes a record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < VALUE_RECORD_HEADER {
            return Err(EdgeError::Corrupted(format!(
                "value record of {} bytes is shorter than {}",
                data.len(),
                VALUE_RECORD_HEADER
            )));
        }
        let mut reader = ByteReader::new(data);
        let value = reader.read_f64_be()?;
        let quality = Quality::from_u8(reader.read_u8()?)?;
        let metadata = if reader.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(reader.rest())?)
        };
        Ok(Self {
            value,
            quality,
            metadata,
        })
    }

    /// Returns true if every entry of `filter` is present with the same value.
    pub fn matches_metadata(&self, filter: &Metadata) -> bool {
        match &self.metadata {
            None => filter.is_empty(),
            Some(metadata) => filter.iter().all(|(k, v)| metadata.get(k) == Some(v)),
        }
    }
}

/// Builds the key of a block covering `[start, end]`.
pub fn block_key(type_tag: &str, series_number: u32, start: i64, end: i64) -> String {
    format!(
        "{}{:020}_{:020}",
        block_prefix(type_tag, series_number),
        encode_timestamp(start),
        encode_timestamp(end)
    )
}

/// Prefix shared by every block key of one series.
pub fn block_prefix(type_tag: &str, series_number: u32) -> String {
    format!("{}{}/{:010}/", BLOCK_PREFIX, type_tag, series_number)
}

/// Reads a block's `[start, end]` from its key.
pub fn parse_block_range(key: &str) -> Result<(i64, i64)> {
    let parts: Vec<&str> = key.split('/').collect();
    if parts.len() != 4 || parts[0] != "data" {
        return Err(EdgeError::Corrupted(format!("not a block key: {}", key)));
    }
    let (start, end) = parts[3]
        .split_once('_')
        .ok_or_else(|| EdgeError::Corrupted(format!("block key without range: {}", key)))?;
    let parse = |s: &str| {
        s.parse::<u64>()
            .map(decode_timestamp)
            .map_err(|e| EdgeError::Corrupted(format!("block key bound {:?}: {}", s, e)))
    };
    Ok((parse(start)?, parse(end)?))
}

/// Returns true if a block covering `[start, end]` lies outside the query.
#[inline]
pub fn block_outside(start: i64, end: i64, q_start: i64, q_end: i64) -> bool {
    end < q_start || start > q_end
}

/// Catalog key of a series configuration.
pub fn series_key(key: &str) -> String {
    format!("{}{}", SERIES_PREFIX, key)
}

fn invalid(id: &str, reason: impl Into<String>) -> EdgeError {
    EdgeError::InvalidSeriesId {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn validate(id: &str, allow_slash: bool) -> Result<()> {
    if id.is_empty() {
        return Err(invalid(id, "empty"));
    }
    if id.len() > MAX_SERIES_ID_LEN {
        return Err(invalid(
            id,
            format!("{} bytes exceeds {}", id.len(), MAX_SERIES_ID_LEN),
        ));
    }
    if let Some(c) = id.chars().find(|&c| {
        !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') || (allow_slash && c == '/'))
    }) {
        return Err(invalid(id, format!("invalid character {:?}", c)));
    }
    if !id.as_bytes()[0].is_ascii_alphanumeric() {
        return Err(invalid(id, "must start with a letter or digit"));
    }
    if id.ends_with('.') {
        return Err(invalid(id, "trailing '.'"));
    }
    if id.contains("..") {
        return Err(invalid(id, "contains '..'"));
    }
    if allow_slash && (id.ends_with('/') || id.contains("//")) {
        return Err(invalid(id, "empty path segment"));
    }
    Ok(())
}

/// Validates a flat series id.
pub fn validate_series_id(id: &str) -> Result<()> {
    validate(id, false)
}

/// Validates a `/`-separated series path.
pub fn validate_series_path(path: &str) -> Result<()> {
    validate(path, true)
}
