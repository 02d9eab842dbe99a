//! SensorWave Edge - embedded time series storage for IoT devices
//!
//! This crate stores sensor readings on the device that produces them.
//!
//! # Components
//!
//! - [`codec`]: Level 1 value codecs, Level 2 block codecs and the frame
//!   that joins timestamp and value columns
//! - [`storage`]: a WAL-backed ordered store, record keys and iterators,
//!   atomic write batches and the record-level [`SensorDb`]
//! - [`edge`]: the per-series ingestion pipeline ([`EdgeManager`]) that
//!   writes compressed blocks and skips them on range queries by key
//!
//! # Example
//!
//! ```rust,no_run
//! use sensorwave_edge::{BlockCodecKind, EdgeManager, Options, SeriesConfig, ValueCodecKind};
//!
//! # fn main() -> sensorwave_edge::Result<()> {
//! let manager = EdgeManager::open("/var/lib/sensorwave", Options::default())?;
//! manager.create_series(
//!     SeriesConfig::new("device_001/temperature")
//!         .with_tag("room", "lab")
//!         .with_value_codec(ValueCodecKind::Xor)
//!         .with_block_codec(BlockCodecKind::Lz4),
//! )?;
//!
//! manager.insert("device_001/temperature", 1_700_000_000_000_000_000, 21.5)?;
//!
//! let readings = manager.query_range("device_001/*", 0, i64::MAX)?;
//! # let _ = readings;
//! manager.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod config;
pub mod edge;
pub mod error;
pub mod storage;

pub use codec::{BlockCodecKind, Column, ColumnType, ValueCodecKind};
pub use config::Options;
pub use edge::{DataType, EdgeManager, Measurement, SeriesConfig, Value};
pub use error::{EdgeError, Result};
pub use storage::{Quality, SensorDb, ValueRecord, WriteBatch};
