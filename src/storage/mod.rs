//! Ordered storage.
//!
//! The layers, bottom up:
//!
//! - [`wal`]: segment-rotated write-ahead log with CRC-framed records.
//! - [`store`]: ordered in-memory map made durable by the log.
//! - [`keys`]: byte layouts of record keys, value records and block keys.
//! - [`iterator`]: forward and reverse range cursors with pattern matching.
//! - [`batch`] and [`db`]: the record-level [`SensorDb`].
//! - [`queries`]: analytical queries over a [`SensorDb`].

pub mod batch;
pub mod db;
pub mod iterator;
pub mod keys;
pub mod queries;
pub mod store;
pub mod wal;

pub use batch::{BatchStats, WriteBatch};
pub use db::{now_nanos, DbStats, SensorDb};
pub use iterator::{
    collect_records, EmptyIterator, FilterIterator, IteratorState, LimitIterator, Pattern,
    RecordIterator, RecordKey, StoreIterator,
};
pub use keys::{Metadata, Quality, ValueRecord};
pub use queries::{Aggregate, Queries, SensorStats};
pub use store::{Direction, Store};
pub use wal::{SyncMode, WalConfig};
