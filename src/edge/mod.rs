//! Per-series ingestion and block queries.
//!
//! [`EdgeManager`] keeps a catalog of series. Every series has its own
//! bounded channel, consumer thread and [`IngestionBuffer`]; full buffers
//! become compressed blocks under keys that carry their time range, so
//! range queries can rule blocks out before reading them.
//!
//! ```text
//! insert ── try_send ──> channel ──> consumer ──> buffer
//!                                                   │ block_size reached
//!                                                   v
//!                          data/{TYPE}/{series}/{start}_{end} = block
//! ```
//!
//! Catalog keys:
//!
//! - `series/{key}`: JSON [`SeriesConfig`]
//! - `meta/counter`: last assigned series number, `u32` LE

pub mod block;
pub mod buffer;
pub mod series;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::codec::primitives::ByteReader;
use crate::config::Options;
use crate::error::{EdgeError, Result};
use crate::storage::db::SensorDb;
use crate::storage::iterator::Pattern;
use crate::storage::keys::{
    block_outside, block_prefix, parse_block_range, series_key as catalog_key, META_COUNTER,
    SERIES_PREFIX,
};
use crate::storage::wal::WalOp;

pub use block::{decode_block, encode_block, CompressedBlock};
pub use buffer::{EdgeStats, IngestionBuffer};
pub use series::{
    match_tags, DataType, Measurement, SeriesConfig, Tags, Value, DEFAULT_BLOCK_SIZE,
    MAX_BLOCK_SIZE,
};

use buffer::{flush, spawn_consumer, SeriesState};

struct SeriesHandle {
    state: Arc<SeriesState>,
    sender: Option<Sender<Measurement>>,
    consumer: Option<JoinHandle<()>>,
}

/// Series catalog, ingestion pipelines and block queries.
pub struct EdgeManager {
    db: SensorDb,
    series: RwLock<BTreeMap<String, SeriesHandle>>,
    counter: Mutex<u32>,
    stats: Arc<EdgeStats>,
    closed: AtomicBool,
}

impl EdgeManager {
    /// Opens the store in `path`, reloads the catalog and starts one
    /// consumer per series.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let db = SensorDb::open(path, options)?;
        let store = db.store();

        let mut counter = match store.get(META_COUNTER.as_bytes())? {
            Some(bytes) => {
                let mut reader = ByteReader::new(&bytes);
                let value = reader.read_u32_le()?;
                reader.finish("series counter")?;
                value
            }
            None => 0,
        };

        let manager = Self {
            series: RwLock::new(BTreeMap::new()),
            counter: Mutex::new(0),
            stats: Arc::new(EdgeStats::default()),
            closed: AtomicBool::new(false),
            db,
        };

        {
            let mut series = manager.series.write();
            for (key, value) in manager.db.store().scan_prefix(SERIES_PREFIX.as_bytes())? {
                let config: SeriesConfig = match serde_json::from_slice(&value) {
                    Ok(config) => config,
                    Err(err) => {
                        warn!(
                            "Skipping unreadable series config {}: {}",
                            String::from_utf8_lossy(&key),
                            err
                        );
                        continue;
                    }
                };
                counter = counter.max(config.series_number);
                let handle = manager.start_series(config)?;
                series.insert(handle.state.key.clone(), handle);
            }
            info!("Loaded {} series", series.len());
        }
        *manager.counter.lock() = counter;
        Ok(manager)
    }

    /// Record-level database sharing this manager's store.
    pub fn db(&self) -> &SensorDb {
        &self.db
    }

    /// Pipeline and query counters.
    pub fn stats(&self) -> &EdgeStats {
        &self.stats
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EdgeError::Closed("edge manager".to_string()));
        }
        Ok(())
    }

    fn start_series(&self, config: SeriesConfig) -> Result<SeriesHandle> {
        let state = Arc::new(SeriesState::new(config));
        let (sender, receiver) = bounded(self.db.options().channel_capacity);
        let consumer = spawn_consumer(
            state.clone(),
            self.db.store().clone(),
            self.stats.clone(),
            receiver,
        )?;
        Ok(SeriesHandle {
            state,
            sender: Some(sender),
            consumer: Some(consumer),
        })
    }

    fn persist_config(&self, config: &SeriesConfig) -> Result<()> {
        self.db
            .store()
            .put(catalog_key(&config.key()), serde_json::to_vec(config)?)
    }

    /// Registers a series. Does nothing if a series with the same path
    /// exists.
    pub fn create_series(&self, mut config: SeriesConfig) -> Result<()> {
        self.check_open()?;
        config.validate()?;
        let key = config.key();

        let mut series = self.series.write();
        if series.contains_key(&key) {
            return Ok(());
        }

        let mut counter = self.counter.lock();
        let number = counter
            .checked_add(1)
            .ok_or_else(|| EdgeError::LimitExceeded("series numbers exhausted".to_string()))?;
        config.series_number = number;
        self.db.store().apply(vec![
            WalOp::put(META_COUNTER, number.to_le_bytes().to_vec()),
            WalOp::put(catalog_key(&key), serde_json::to_vec(&config)?),
        ])?;
        *counter = number;

        info!(
            "Created series {} (#{}, {}, {} + {}, block size {})",
            key,
            number,
            config.data_type,
            config.value_codec,
            config.block_codec,
            config.block_size
        );
        let handle = self.start_series(config)?;
        series.insert(key, handle);
        Ok(())
    }

    /// Queues a measurement for `series`.
    ///
    /// An untyped or mixed series is locked to the value's type on its
    /// first insert. Fails with `Backpressure` when the series' channel is
    /// full; the measurement is not queued and may be retried.
    pub fn insert(&self, series: &str, timestamp: i64, value: impl Into<Value>) -> Result<()> {
        self.check_open()?;
        let value = value.into();
        let map = self.series.read();
        let handle = map
            .get(series)
            .ok_or_else(|| EdgeError::NotFound(format!("series {}", series)))?;

        {
            let mut config = handle.state.config.write();
            let mut updated = config.clone();
            if updated.accept(&value)? {
                self.persist_config(&updated)?;
                debug!("Series {} locked to {}", series, updated.data_type);
                *config = updated;
            }
        }

        let sender = handle
            .sender
            .as_ref()
            .ok_or_else(|| EdgeError::Closed(format!("series {}", series)))?;
        match sender.try_send(Measurement { timestamp, value }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EdgeError::Backpressure(series.to_string())),
            Err(TrySendError::Disconnected(_)) => {
                Err(EdgeError::Closed(format!("series {}", series)))
            }
        }
    }

    fn resolve(&self, series_or_pattern: &str) -> Result<Vec<Arc<SeriesState>>> {
        let map = self.series.read();
        if let Some(handle) = map.get(series_or_pattern) {
            return Ok(vec![handle.state.clone()]);
        }
        let pattern = Pattern::new(series_or_pattern);
        if matches!(pattern, Pattern::Exact(_)) {
            return Err(EdgeError::NotFound(format!("series {}", series_or_pattern)));
        }
        Ok(map
            .values()
            .filter(|h| pattern.matches(&h.state.config.read().path))
            .map(|h| h.state.clone())
            .collect())
    }

    fn state(&self, series: &str) -> Result<Arc<SeriesState>> {
        self.series
            .read()
            .get(series)
            .map(|h| h.state.clone())
            .ok_or_else(|| EdgeError::NotFound(format!("series {}", series)))
    }

    /// Measurements with `start <= ts <= end` of one series, or of every
    /// series whose path matches a wildcard pattern.
    ///
    /// Stored blocks come first in key order, then unflushed measurements.
    /// Within a block, measurements keep arrival order.
    pub fn query_range(
        &self,
        series_or_pattern: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Measurement>> {
        self.check_open()?;
        let targets = self.resolve(series_or_pattern)?;
        let mut out = Vec::new();
        if start > end {
            return Ok(out);
        }
        for state in targets {
            self.query_series(&state, start, end, &mut out)?;
        }
        Ok(out)
    }

    fn query_series(
        &self,
        state: &SeriesState,
        start: i64,
        end: i64,
        out: &mut Vec<Measurement>,
    ) -> Result<()> {
        let buffer = state.buffer.lock();
        let config = state.config.read().clone();
        let store = self.db.store();

        if let Some(column_type) = config.data_type.column_type() {
            let prefix = block_prefix(config.data_type.tag(), config.series_number);
            for key in store.keys_with_prefix(prefix.as_bytes())? {
                let key_str = String::from_utf8_lossy(&key);
                match parse_block_range(&key_str) {
                    Ok((block_start, block_end))
                        if block_outside(block_start, block_end, start, end) =>
                    {
                        self.stats.blocks_skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Cannot read range of {}, decoding it: {}", key_str, err),
                }
                let Some(payload) = store.get(&key)? else {
                    continue;
                };
                self.stats.blocks_decompressed.fetch_add(1, Ordering::Relaxed);
                match decode_block(&payload, column_type, config.value_codec, config.block_codec) {
                    Ok(measurements) => out.extend(
                        measurements
                            .into_iter()
                            .filter(|m| m.timestamp >= start && m.timestamp <= end),
                    ),
                    Err(err) => warn!("Skipping corrupt block {}: {}", key_str, err),
                }
            }
        }

        out.extend(buffer.in_range(start, end).cloned());
        Ok(())
    }

    fn edge_block(
        &self,
        state: &SeriesState,
        pick: impl FnOnce(Vec<(i64, i64, Vec<u8>)>) -> Option<Vec<u8>>,
        choose: impl Fn(&Measurement, &Measurement) -> bool,
        buffered: Option<Measurement>,
    ) -> Result<Option<Measurement>> {
        let config = state.config.read().clone();
        let mut best = buffered;
        let Some(column_type) = config.data_type.column_type() else {
            return Ok(best);
        };
        let store = self.db.store();
        let prefix = block_prefix(config.data_type.tag(), config.series_number);
        let ranged: Vec<(i64, i64, Vec<u8>)> = store
            .keys_with_prefix(prefix.as_bytes())?
            .into_iter()
            .filter_map(|key| {
                let (s, e) = parse_block_range(&String::from_utf8_lossy(&key)).ok()?;
                Some((s, e, key))
            })
            .collect();
        let Some(key) = pick(ranged) else {
            return Ok(best);
        };
        let Some(payload) = store.get(&key)? else {
            return Ok(best);
        };
        self.stats.blocks_decompressed.fetch_add(1, Ordering::Relaxed);
        for m in decode_block(&payload, column_type, config.value_codec, config.block_codec)? {
            if best.as_ref().map_or(true, |b| choose(&m, b)) {
                best = Some(m);
            }
        }
        Ok(best)
    }

    /// Oldest measurement of `series`, stored or buffered.
    pub fn query_first(&self, series: &str) -> Result<Measurement> {
        self.check_open()?;
        let state = self.state(series)?;
        let buffer = state.buffer.lock();
        self.edge_block(
            &state,
            |blocks| blocks.into_iter().min_by_key(|(s, _, _)| *s).map(|(_, _, k)| k),
            |m, best| m.timestamp < best.timestamp,
            buffer.earliest().cloned(),
        )?
        .ok_or_else(|| EdgeError::NotFound(format!("no measurements for series {}", series)))
    }

    /// Newest measurement of `series`, stored or buffered.
    pub fn query_last(&self, series: &str) -> Result<Measurement> {
        self.check_open()?;
        let state = self.state(series)?;
        let buffer = state.buffer.lock();
        self.edge_block(
            &state,
            |blocks| blocks.into_iter().max_by_key(|(_, e, _)| *e).map(|(_, _, k)| k),
            |m, best| m.timestamp > best.timestamp,
            buffer.latest().cloned(),
        )?
        .ok_or_else(|| EdgeError::NotFound(format!("no measurements for series {}", series)))
    }

    /// Paths of every series, sorted.
    pub fn list_series(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }

    /// Configs of series whose path matches `pattern`.
    pub fn list_series_by_path(&self, pattern: &str) -> Vec<SeriesConfig> {
        let pattern = Pattern::new(pattern);
        self.configs(|config| pattern.matches(&config.path))
    }

    /// Configs of series carrying every tag of `tags`.
    pub fn list_series_by_tags(&self, tags: &Tags) -> Vec<SeriesConfig> {
        self.configs(|config| match_tags(&config.tags, tags))
    }

    /// Configs of the series directly under `device/`.
    pub fn list_series_by_device(&self, device: &str) -> Vec<SeriesConfig> {
        self.list_series_by_path(&format!("{}/*", device))
    }

    fn configs(&self, filter: impl Fn(&SeriesConfig) -> bool) -> Vec<SeriesConfig> {
        self.series
            .read()
            .values()
            .map(|h| h.state.config.read().clone())
            .filter(|config| filter(config))
            .collect()
    }

    /// Config of one series.
    pub fn get_series(&self, series: &str) -> Result<SeriesConfig> {
        Ok(self.state(series)?.config.read().clone())
    }

    /// Measurements waiting in the buffer of `series`.
    pub fn pending(&self, series: &str) -> Result<usize> {
        Ok(self.state(series)?.buffer.lock().len())
    }

    /// Stored blocks of `series`.
    pub fn block_count(&self, series: &str) -> Result<usize> {
        let state = self.state(series)?;
        let config = state.config.read().clone();
        let prefix = block_prefix(config.data_type.tag(), config.series_number);
        Ok(self.db.store().keys_with_prefix(prefix.as_bytes())?.len())
    }

    /// Writes the partial buffer of `series` as a block now.
    pub fn flush_series(&self, series: &str) -> Result<()> {
        self.check_open()?;
        let state = self.state(series)?;
        let mut buffer = state.buffer.lock();
        flush(self.db.store(), &state, &mut buffer, &self.stats);
        Ok(())
    }

    /// Deletes blocks that end before `now - retention`, and expired
    /// records of the record-level database. Returns the number of keys
    /// deleted.
    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        self.check_open()?;
        let retention =
            i64::try_from(self.db.options().retention.as_nanos()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention);
        let store = self.db.store();

        let mut ops = Vec::new();
        for state in self.resolve("*")? {
            let config = state.config.read().clone();
            let prefix = block_prefix(config.data_type.tag(), config.series_number);
            for key in store.keys_with_prefix(prefix.as_bytes())? {
                if let Ok((_, end)) = parse_block_range(&String::from_utf8_lossy(&key)) {
                    if end < cutoff {
                        ops.push(WalOp::delete(key));
                    }
                }
            }
        }
        let blocks = if ops.is_empty() {
            0
        } else {
            store.apply(ops)?.removed
        };
        if blocks > 0 {
            debug!("Retention removed {} blocks ending before {}", blocks, cutoff);
        }
        Ok(blocks + self.db.purge_expired(now)?)
    }

    /// Stops every consumer after it flushes its partial buffer, then
    /// syncs and closes the store. Later operations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut series = self.series.write();
        for handle in series.values_mut() {
            handle.sender.take();
        }
        for (key, handle) in series.iter_mut() {
            if let Some(consumer) = handle.consumer.take() {
                if consumer.join().is_err() {
                    error!("Consumer for {} panicked", key);
                }
            }
        }
        info!("Stopped {} series consumers", series.len());
        self.db.sync()?;
        self.db.close()
    }

    /// Returns true once [`EdgeManager::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for EdgeManager {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Failed to close edge manager: {}", err);
        }
    }
}
