//! Engine options.
//!
//! [`Options`] configures a [`SensorDb`](crate::storage::SensorDb) and the
//! [`EdgeManager`](crate::edge::EdgeManager) built on top of it. Values are
//! set through `with_*` builders; [`Options::validate`] repairs settings
//! that would leave the engine unable to run.

use std::time::Duration;

use crate::storage::iterator::DEFAULT_CHUNK_SIZE;
use crate::storage::wal::{SyncMode, WalConfig, DEFAULT_MAX_SEGMENTS};

/// Default number of entries a range scan copies out of the store at once.
pub const DEFAULT_SCAN_CHUNK_SIZE: usize = DEFAULT_CHUNK_SIZE;

/// Default retention period (30 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default capacity of each series' ingestion channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default WAL segment size (8 MB).
pub const DEFAULT_SEGMENT_SIZE: usize = 8 * 1024 * 1024;

/// Default number of WAL segments kept before the log is checkpointed.
pub const DEFAULT_MAX_WAL_SEGMENTS: usize = DEFAULT_MAX_SEGMENTS;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Entries copied out of the store per step of a range scan.
    pub scan_chunk_size: usize,
    /// Sync the WAL on every commit.
    pub sync_writes: bool,
    /// Records older than this are removed by retention passes.
    pub retention: Duration,
    /// Validate series ids on the record write path.
    pub validate_ids: bool,
    /// Capacity of each series' ingestion channel.
    pub channel_capacity: usize,
    /// Maximum WAL segment size in bytes.
    pub segment_size: usize,
    /// WAL segments allowed on disk before the log is rewritten as a snapshot.
    pub max_wal_segments: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scan_chunk_size: DEFAULT_SCAN_CHUNK_SIZE,
            sync_writes: false,
            retention: DEFAULT_RETENTION,
            validate_ids: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            segment_size: DEFAULT_SEGMENT_SIZE,
            max_wal_segments: DEFAULT_MAX_WAL_SEGMENTS,
        }
    }
}

impl Options {
    /// Preset for write-heavy gateways with memory to spare.
    pub fn performance() -> Self {
        Self {
            scan_chunk_size: 4096,
            sync_writes: false,
            validate_ids: false,
            channel_capacity: 1000,
            segment_size: 64 * 1024 * 1024,
            max_wal_segments: 8,
            ..Self::default()
        }
    }

    /// Preset for constrained devices.
    pub fn minimal_memory() -> Self {
        Self {
            scan_chunk_size: 32,
            sync_writes: true,
            channel_capacity: 16,
            segment_size: 1024 * 1024,
            max_wal_segments: 2,
            ..Self::default()
        }
    }

    /// Sets the range scan chunk size.
    pub fn with_scan_chunk_size(mut self, size: usize) -> Self {
        self.scan_chunk_size = size;
        self
    }

    /// Enables or disables syncing the WAL on every commit.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Sets the retention period.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Enables or disables series id validation.
    pub fn with_validate_ids(mut self, validate: bool) -> Self {
        self.validate_ids = validate;
        self
    }

    /// Sets the ingestion channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the WAL segment size.
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets how many WAL segments may pile up before a checkpoint.
    pub fn with_max_wal_segments(mut self, segments: usize) -> Self {
        self.max_wal_segments = segments;
        self
    }

    /// Replaces zero sizes with their defaults.
    pub fn validate(mut self) -> Self {
        if self.scan_chunk_size == 0 {
            self.scan_chunk_size = DEFAULT_SCAN_CHUNK_SIZE;
        }
        if self.retention.is_zero() {
            self.retention = DEFAULT_RETENTION;
        }
        if self.channel_capacity == 0 {
            self.channel_capacity = DEFAULT_CHANNEL_CAPACITY;
        }
        if self.segment_size == 0 {
            self.segment_size = DEFAULT_SEGMENT_SIZE;
        }
        if self.max_wal_segments == 0 {
            self.max_wal_segments = DEFAULT_MAX_WAL_SEGMENTS;
        }
        self
    }

    /// WAL settings derived from these options.
    pub fn wal_config(&self) -> WalConfig {
        WalConfig {
            segment_size: self.segment_size,
            sync_mode: if self.sync_writes {
                SyncMode::Fsync
            } else {
                SyncMode::None
            },
            max_segments: self.max_wal_segments,
        }
    }
}
