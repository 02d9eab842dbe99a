//! Error and Result types for the storage engine.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, EdgeError>;

/// The error type for codec, storage and ingestion operations.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// Buffer ended before a complete value could be decoded.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Unknown format flag, codec kind or codec/type combination.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Dictionary entry count, string length or numeric range exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Value is incompatible with the series' data type.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type the series accepts.
        expected: String,
        /// Type of the rejected value.
        actual: String,
    },

    /// Series or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedded lengths or identifiers are inconsistent.
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// Ingestion channel for the series is full; retry later.
    #[error("Backpressure: ingestion channel full for series {0}")]
    Backpressure(String),

    /// Operation on a closed store, batch or manager.
    #[error("Closed: {0}")]
    Closed(String),

    /// Series identifier failed validation.
    #[error("Invalid series id {id:?}: {reason}")]
    InvalidSeriesId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// WAL record checksum does not match its payload.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// Invalid magic bytes in a WAL segment header.
    #[error("Invalid magic bytes: expected EWAL, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported WAL segment format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Block compression library failure.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata or catalog JSON could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
