//! Record-level sensor database.
//!
//! [`SensorDb`] stores one [`ValueRecord`] per `(series id, timestamp)` under
//! the time-first record key, and answers range scans through the iterators
//! in [`iterator`](crate::storage::iterator).

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Options;
use crate::error::{EdgeError, Result};
use crate::storage::batch::{BatchStats, WriteBatch};
use crate::storage::iterator::{
    EmptyIterator, FilterIterator, LimitIterator, Pattern, RecordIterator, StoreIterator,
};
use crate::storage::keys::{
    decode_record_key, record_bound, record_key, validate_series_id, Metadata, Quality,
    ValueRecord, RECORD_PREFIX,
};
use crate::storage::store::{Direction, Store};
use crate::storage::wal::WalOp;

/// Engine version reported by [`SensorDb::stats`].
pub const ENGINE_VERSION: &str = concat!("sensorwave-edge-", env!("CARGO_PKG_VERSION"));

/// Maximum records removed by one retention pass.
pub const MAX_PURGE_PER_PASS: usize = 1000;

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Database summary.
#[derive(Debug, Clone, PartialEq)]
pub struct DbStats {
    /// Distinct series ids with at least one record.
    pub sensors: usize,
    /// Stored records.
    pub records: usize,
    /// Approximate size of all keys and values.
    pub size_bytes: usize,
    /// Time of the last compaction, or of opening if none ran.
    pub last_compaction: SystemTime,
    /// Engine version string.
    pub version: &'static str,
}

/// Embedded sensor database.
pub struct SensorDb {
    store: Arc<Store>,
    options: Options,
    last_compaction: Mutex<SystemTime>,
}

impl SensorDb {
    /// Opens or creates a database in `path`.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        let options = options.validate();
        let store = Store::open(path, options.wal_config())?;
        info!(
            "Opened sensor database at {} ({} keys)",
            path.display(),
            store.len()
        );
        Ok(Self {
            store: Arc::new(store),
            options,
            last_compaction: Mutex::new(SystemTime::now()),
        })
    }

    /// Options in effect.
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn check_open(&self) -> Result<()> {
        if self.store.is_closed() {
            return Err(EdgeError::Closed("database".to_string()));
        }
        Ok(())
    }

    fn check_id(&self, series_id: &str) -> Result<()> {
        if self.options.validate_ids {
            validate_series_id(series_id)?;
        }
        Ok(())
    }

    /// Writes a reading of Good quality.
    pub fn insert(&self, series_id: &str, value: f64, timestamp: i64) -> Result<()> {
        self.insert_with_quality(series_id, value, Quality::Good, timestamp, None)
    }

    /// Writes a reading with an explicit quality and optional metadata.
    pub fn insert_with_quality(
        &self,
        series_id: &str,
        value: f64,
        quality: Quality,
        timestamp: i64,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        self.check_id(series_id)?;
        let record = ValueRecord {
            value,
            quality,
            metadata,
        };
        self.store
            .put(record_key(series_id, timestamp), record.encode()?)
    }

    /// Reads the record of `series_id` at exactly `timestamp`.
    pub fn get(&self, series_id: &str, timestamp: i64) -> Result<Option<ValueRecord>> {
        match self.store.get(&record_key(series_id, timestamp))? {
            Some(bytes) => Ok(Some(ValueRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan(
        &self,
        pattern: &str,
        start: i64,
        end: i64,
        direction: Direction,
    ) -> Result<Box<dyn RecordIterator>> {
        self.check_open()?;
        if start > end {
            return Ok(Box::new(EmptyIterator::new()));
        }
        Ok(Box::new(
            StoreIterator::new(
                self.store.clone(),
                Pattern::new(pattern),
                start,
                end,
                direction,
            )
            .with_chunk_size(self.options.scan_chunk_size),
        ))
    }

    /// Records matching `pattern` with `start <= ts <= end`, oldest first.
    pub fn query_range(
        &self,
        pattern: &str,
        start: i64,
        end: i64,
    ) -> Result<Box<dyn RecordIterator>> {
        self.scan(pattern, start, end, Direction::Forward)
    }

    /// Like [`SensorDb::query_range`], yielding at most `limit` records.
    /// A limit of zero means no limit.
    pub fn query_range_limit(
        &self,
        pattern: &str,
        start: i64,
        end: i64,
        limit: usize,
    ) -> Result<Box<dyn RecordIterator>> {
        let iter = self.query_range(pattern, start, end)?;
        if limit == 0 {
            return Ok(iter);
        }
        Ok(Box::new(LimitIterator::new(iter, limit)))
    }

    /// Records matching `pattern` with `start <= ts <= end`, newest first.
    pub fn query_range_reverse(
        &self,
        pattern: &str,
        start: i64,
        end: i64,
    ) -> Result<Box<dyn RecordIterator>> {
        self.scan(pattern, start, end, Direction::Reverse)
    }

    /// Range query that also filters by quality and metadata subset.
    pub fn query_with_filters(
        &self,
        pattern: &str,
        start: i64,
        end: i64,
        quality: Option<Quality>,
        metadata: Option<Metadata>,
    ) -> Result<Box<dyn RecordIterator>> {
        let iter = self.query_range(pattern, start, end)?;
        if quality.is_none() && metadata.is_none() {
            return Ok(iter);
        }
        Ok(Box::new(FilterIterator::new(iter, quality, metadata)))
    }

    /// Starts an empty batch.
    pub fn new_batch(&self) -> WriteBatch {
        WriteBatch::new(self.options.validate_ids)
    }

    /// Applies every write of `batch` atomically and seals it.
    pub fn commit(&self, batch: &mut WriteBatch) -> Result<()> {
        self.commit_with_stats(batch).map(|_| ())
    }

    /// Like [`SensorDb::commit`], reporting what was written.
    pub fn commit_with_stats(&self, batch: &mut WriteBatch) -> Result<BatchStats> {
        self.check_open()?;
        let started = Instant::now();
        let bytes = batch.bytes();
        let ops = batch.take_ops()?;
        let entries = ops.len();
        if !ops.is_empty() {
            self.store.apply(ops)?;
        }
        Ok(BatchStats {
            entries,
            bytes,
            duration: started.elapsed(),
        })
    }

    /// Commits `batch`, then runs one retention pass.
    pub fn commit_with_retention(&self, batch: &mut WriteBatch) -> Result<usize> {
        self.commit(batch)?;
        self.purge_expired(now_nanos())
    }

    /// Deletes up to [`MAX_PURGE_PER_PASS`] records older than
    /// `now - retention`, oldest first. Returns the number deleted.
    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        self.check_open()?;
        let retention = i64::try_from(self.options.retention.as_nanos()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention);
        let lower = [RECORD_PREFIX];
        let upper = record_bound(cutoff);
        let expired = self.store.range(
            std::ops::Bound::Included(&lower[..]),
            std::ops::Bound::Excluded(upper.as_slice()),
            Direction::Forward,
            MAX_PURGE_PER_PASS,
        )?;
        if expired.is_empty() {
            return Ok(0);
        }
        let ops: Vec<WalOp> = expired.into_iter().map(|(k, _)| WalOp::delete(k)).collect();
        let outcome = self.store.apply(ops)?;
        debug!(
            "Retention removed {} records older than {}",
            outcome.removed, cutoff
        );
        Ok(outcome.removed)
    }

    /// Counts sensors and records by scanning the record keyspace.
    pub fn stats(&self) -> Result<DbStats> {
        self.check_open()?;
        let keys = self.store.keys_with_prefix(&[RECORD_PREFIX])?;
        let mut sensors = BTreeSet::new();
        let mut records = 0;
        for key in &keys {
            if let Ok((_, id)) = decode_record_key(key) {
                sensors.insert(id.to_string());
                records += 1;
            }
        }
        Ok(DbStats {
            sensors: sensors.len(),
            records,
            size_bytes: self.store.approximate_bytes(),
            last_compaction: *self.last_compaction.lock(),
            version: ENGINE_VERSION,
        })
    }

    /// Flushes and fsyncs the write-ahead log.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Rewrites the write-ahead log as a snapshot of live data.
    pub fn compact(&self) -> Result<()> {
        self.store.checkpoint()?;
        *self.last_compaction.lock() = SystemTime::now();
        debug!("Compacted store at {}", self.store.dir().display());
        Ok(())
    }

    /// Closes the database. Later operations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::iterator::collect_records;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SensorDb {
        SensorDb::open(dir.path(), Options::default()).unwrap()
    }

    fn timestamps(iter: Box<dyn RecordIterator>) -> Vec<i64> {
        collect_records(iter)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.timestamp)
            .collect()
    }

    #[test]
    fn test_insert_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        db.insert("temp.1", 21.5, 100).unwrap();
        let record = db.get("temp.1", 100).unwrap().unwrap();
        assert_eq!(record.value, 21.5);
        assert_eq!(record.quality, Quality::Good);
        assert!(db.get("temp.1", 101).unwrap().is_none());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        assert!(matches!(
            db.insert("bad id", 1.0, 0),
            Err(EdgeError::InvalidSeriesId { .. })
        ));
    }

    #[test]
    fn test_query_variants() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        for ts in 0..10 {
            db.insert("a", ts as f64, ts).unwrap();
            db.insert("b", ts as f64, ts).unwrap();
        }
        assert_eq!(timestamps(db.query_range("a", 2, 5).unwrap()), vec![2, 3, 4, 5]);
        assert_eq!(timestamps(db.query_range_limit("a", 0, 9, 3).unwrap()), vec![0, 1, 2]);
        assert_eq!(timestamps(db.query_range_limit("a", 0, 9, 0).unwrap()).len(), 10);
        assert_eq!(timestamps(db.query_range_reverse("b", 7, 9).unwrap()), vec![9, 8, 7]);
        assert_eq!(timestamps(db.query_range("*", 0, 0).unwrap()), vec![0, 0]);
        assert!(timestamps(db.query_range("a", 5, 2).unwrap()).is_empty());
    }

    #[test]
    fn test_query_with_filters() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        let mut metadata = Metadata::new();
        metadata.insert("unit".into(), "C".into());
        db.insert_with_quality("t", 1.0, Quality::Good, 1, Some(metadata.clone()))
            .unwrap();
        db.insert_with_quality("t", 2.0, Quality::Bad, 2, None).unwrap();
        db.insert_with_quality("t", 3.0, Quality::Good, 3, None).unwrap();

        let good = db.query_with_filters("t", 0, 10, Some(Quality::Good), None).unwrap();
        assert_eq!(timestamps(good), vec![1, 3]);
        let tagged = db.query_with_filters("t", 0, 10, None, Some(metadata)).unwrap();
        assert_eq!(timestamps(tagged), vec![1]);
    }

    #[test]
    fn test_batch_commit() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        let mut batch = db.new_batch();
        for ts in 0..5 {
            batch.add("s", ts as f64, ts).unwrap();
        }
        let stats = db.commit_with_stats(&mut batch).unwrap();
        assert_eq!(stats.entries, 5);
        assert!(stats.bytes > 0);
        assert_eq!(db.stats().unwrap().records, 5);
        assert!(matches!(db.commit(&mut batch), Err(EdgeError::Closed(_))));

        let mut empty = db.new_batch();
        db.commit(&mut empty).unwrap();
        assert!(empty.is_committed());
    }

    #[test]
    fn test_purge_expired() {
        let temp_dir = TempDir::new().unwrap();
        let db = SensorDb::open(
            temp_dir.path(),
            Options::default().with_retention(Duration::from_nanos(100)),
        )
        .unwrap();
        for ts in 0..20 {
            db.insert("r", ts as f64, ts * 10).unwrap();
        }
        // cutoff = 250 - 100 = 150, so ts 0..=140 go.
        assert_eq!(db.purge_expired(250).unwrap(), 15);
        assert_eq!(timestamps(db.query_range("r", i64::MIN, i64::MAX).unwrap())[0], 150);
        assert_eq!(db.purge_expired(250).unwrap(), 0);
    }

    #[test]
    fn test_purge_is_capped_per_pass() {
        let temp_dir = TempDir::new().unwrap();
        let db = SensorDb::open(
            temp_dir.path(),
            Options::default().with_retention(Duration::from_nanos(1)),
        )
        .unwrap();
        let mut batch = db.new_batch();
        for ts in 0..(MAX_PURGE_PER_PASS as i64 + 5) {
            batch.add("r", 0.0, ts).unwrap();
        }
        db.commit(&mut batch).unwrap();
        assert_eq!(db.purge_expired(i64::MAX).unwrap(), MAX_PURGE_PER_PASS);
        assert_eq!(db.purge_expired(i64::MAX).unwrap(), 5);
    }

    #[test]
    fn test_stats_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = open(&temp_dir);
            db.insert("a", 1.0, 1).unwrap();
            db.insert("a", 2.0, 2).unwrap();
            db.insert("b", 3.0, 1).unwrap();
            let stats = db.stats().unwrap();
            assert_eq!(stats.sensors, 2);
            assert_eq!(stats.records, 3);
            assert_eq!(stats.version, ENGINE_VERSION);
            db.compact().unwrap();
            db.close().unwrap();
        }
        let db = open(&temp_dir);
        assert_eq!(db.stats().unwrap().records, 3);
        assert_eq!(db.get("b", 1).unwrap().unwrap().value, 3.0);
    }

    #[test]
    fn test_closed_database() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);
        db.close().unwrap();
        assert!(matches!(db.insert("a", 1.0, 1), Err(EdgeError::Closed(_))));
        assert!(matches!(db.query_range("a", 0, 1), Err(EdgeError::Closed(_))));
        assert!(matches!(db.stats(), Err(EdgeError::Closed(_))));
    }
}
