//! Write batches.
//!
//! A [`WriteBatch`] collects record puts and is applied by
//! [`SensorDb::commit`](crate::storage::SensorDb::commit) as a single WAL
//! record, so either every write of the batch survives a crash or none does.

use std::time::Duration;

use crate::error::{EdgeError, Result};
use crate::storage::keys::{record_key, validate_series_id, Metadata, Quality, ValueRecord};
use crate::storage::wal::WalOp;

/// Writes pending for one atomic commit.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WalOp>,
    bytes: usize,
    committed: bool,
    validate_ids: bool,
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Records written.
    pub entries: usize,
    /// Encoded key and value bytes.
    pub bytes: usize,
    /// Wall time of the commit.
    pub duration: Duration,
}

impl WriteBatch {
    pub(crate) fn new(validate_ids: bool) -> Self {
        Self {
            validate_ids,
            ..Self::default()
        }
    }

    /// Queues a reading of Good quality.
    pub fn add(&mut self, series_id: &str, value: f64, timestamp: i64) -> Result<()> {
        self.add_with_quality(series_id, value, Quality::Good, timestamp, None)
    }

    /// Queues a reading with an explicit quality and optional metadata.
    pub fn add_with_quality(
        &mut self,
        series_id: &str,
        value: f64,
        quality: Quality,
        timestamp: i64,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        if self.committed {
            return Err(EdgeError::Closed("batch already committed".to_string()));
        }
        if self.validate_ids {
            validate_series_id(series_id)?;
        }
        let key = record_key(series_id, timestamp);
        let value = ValueRecord {
            value,
            quality,
            metadata,
        }
        .encode()?;
        self.bytes += key.len() + value.len();
        self.ops.push(WalOp::put(key, value));
        Ok(())
    }

    /// Number of queued writes.
    pub fn size(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Encoded size of the queued writes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Returns true once the batch has been committed.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Drops queued writes. Has no effect on a committed batch.
    pub fn reset(&mut self) {
        if !self.committed {
            self.ops.clear();
            self.bytes = 0;
        }
    }

    /// Hands the queued writes to the committer and seals the batch.
    pub(crate) fn take_ops(&mut self) -> Result<Vec<WalOp>> {
        if self.committed {
            return Err(EdgeError::Closed("batch already committed".to_string()));
        }
        self.committed = true;
        self.bytes = 0;
        Ok(std::mem::take(&mut self.ops))
    }
}
