//! Per-series ingestion buffer and its consumer thread.
//!
//! Each series owns a bounded channel and one consumer thread. The consumer
//! appends measurements to the series' [`IngestionBuffer`] and, when the
//! buffer holds `block_size` measurements, encodes them into one block and
//! writes it to the store. The buffer lock is held across the write and the
//! reset, so a reader holding the same lock sees each measurement either in
//! the buffer or in a stored block, never both and never neither.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::edge::block::{decode_block, encode_block};
use crate::edge::series::{Measurement, SeriesConfig};
use crate::error::{EdgeError, Result};
use crate::storage::keys::block_key;
use crate::storage::store::Store;

/// Buffer of unflushed measurements, in arrival order. Storage grows with
/// use; `capacity` only sets when the buffer counts as full.
#[derive(Debug)]
pub struct IngestionBuffer {
    items: Vec<Measurement>,
    capacity: usize,
}

impl IngestionBuffer {
    /// Creates a buffer that fills at `capacity` measurements.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
        }
    }

    /// Appends a measurement. Returns true once the buffer is full.
    pub fn push(&mut self, measurement: Measurement) -> bool {
        self.items.push(measurement);
        self.is_full()
    }

    /// Number of buffered measurements; the write index.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if the buffer reached its capacity.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Capacity in measurements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered measurements.
    pub fn as_slice(&self) -> &[Measurement] {
        &self.items
    }

    /// Removes and returns every buffered measurement.
    pub fn take(&mut self) -> Vec<Measurement> {
        std::mem::take(&mut self.items)
    }

    /// Buffered measurements with `start <= ts <= end`.
    pub fn in_range(&self, start: i64, end: i64) -> impl Iterator<Item = &Measurement> + '_ {
        self.items
            .iter()
            .filter(move |m| m.timestamp >= start && m.timestamp <= end)
    }

    /// Buffered measurement with the largest timestamp.
    pub fn latest(&self) -> Option<&Measurement> {
        self.items.iter().max_by_key(|m| m.timestamp)
    }

    /// Buffered measurement with the smallest timestamp.
    pub fn earliest(&self) -> Option<&Measurement> {
        self.items.iter().min_by_key(|m| m.timestamp)
    }
}

/// Counters shared by the consumers and the query path.
#[derive(Debug, Default)]
pub struct EdgeStats {
    pub(crate) blocks_flushed: AtomicU64,
    pub(crate) flush_errors: AtomicU64,
    pub(crate) blocks_decompressed: AtomicU64,
    pub(crate) blocks_skipped: AtomicU64,
}

impl EdgeStats {
    /// Blocks written by consumers.
    pub fn blocks_flushed(&self) -> u64 {
        self.blocks_flushed.load(Ordering::Relaxed)
    }

    /// Flushes that failed and dropped their measurements.
    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    /// Blocks decoded by range queries.
    pub fn blocks_decompressed(&self) -> u64 {
        self.blocks_decompressed.load(Ordering::Relaxed)
    }

    /// Blocks range queries ruled out by key alone.
    pub fn blocks_skipped(&self) -> u64 {
        self.blocks_skipped.load(Ordering::Relaxed)
    }
}

/// Shared state of one series.
pub(crate) struct SeriesState {
    pub(crate) key: String,
    pub(crate) config: RwLock<SeriesConfig>,
    pub(crate) buffer: Mutex<IngestionBuffer>,
}

impl SeriesState {
    pub(crate) fn new(config: SeriesConfig) -> Self {
        Self {
            key: config.key(),
            buffer: Mutex::new(IngestionBuffer::new(config.block_size)),
            config: RwLock::new(config),
        }
    }
}

/// Encodes `measurements` and writes them as one block, merging with a
/// block already stored under the same key. Returns the key written.
///
/// A merge decodes the stored block and re-encodes it with the new
/// measurements. Lossless codecs keep stored values bit for bit. The `f32`
/// paths of `DeltaDelta` and `BitWidth` may move a stored float by another
/// `f32` rounding step per merge.
pub(crate) fn write_block(
    store: &Store,
    config: &SeriesConfig,
    mut measurements: Vec<Measurement>,
) -> Result<String> {
    let column_type = config.data_type.column_type().ok_or_else(|| {
        EdgeError::UnsupportedFormat(format!("series {} has no value type", config.path))
    })?;
    let mut block = encode_block(
        &measurements,
        column_type,
        config.value_codec,
        config.block_codec,
    )?;
    let tag = config.data_type.tag();
    let mut key = block_key(tag, config.series_number, block.start, block.end);

    if let Some(existing) = store.get(key.as_bytes())? {
        let mut merged = decode_block(
            &existing,
            column_type,
            config.value_codec,
            config.block_codec,
        )?;
        debug!(
            "Merging {} measurements into existing block {}",
            measurements.len(),
            key
        );
        merged.append(&mut measurements);
        block = encode_block(&merged, column_type, config.value_codec, config.block_codec)?;
        key = block_key(tag, config.series_number, block.start, block.end);
    }

    store.put(key.as_bytes().to_vec(), block.payload)?;
    Ok(key)
}

/// Flushes the buffer of `state`. The buffer is emptied even on failure.
pub(crate) fn flush(store: &Store, state: &SeriesState, buffer: &mut IngestionBuffer, stats: &EdgeStats) {
    if buffer.is_empty() {
        return;
    }
    let measurements = buffer.take();
    let count = measurements.len();
    let config = state.config.read().clone();
    match write_block(store, &config, measurements) {
        Ok(key) => {
            stats.blocks_flushed.fetch_add(1, Ordering::Relaxed);
            debug!("Flushed {} measurements of {} to {}", count, state.key, key);
        }
        Err(err) => {
            stats.flush_errors.fetch_add(1, Ordering::Relaxed);
            error!("Failed to flush {} measurements of {}: {}", count, state.key, err);
        }
    }
}

/// Starts the consumer of one series. It runs until every sender is
/// dropped, then flushes the partial buffer and exits.
pub(crate) fn spawn_consumer(
    state: Arc<SeriesState>,
    store: Arc<Store>,
    stats: Arc<EdgeStats>,
    receiver: Receiver<Measurement>,
) -> Result<JoinHandle<()>> {
    let name = format!("series-{}", state.config.read().series_number);
    let handle = thread::Builder::new().name(name).spawn(move || {
        for measurement in receiver.iter() {
            let mut buffer = state.buffer.lock();
            if buffer.push(measurement) {
                flush(&store, &state, &mut buffer, &stats);
            }
        }
        let mut buffer = state.buffer.lock();
        flush(&store, &state, &mut buffer, &stats);
        debug!("Consumer for {} stopped", state.key);
    })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BlockCodecKind, ValueCodecKind};
    use crate::edge::series::DataType;
    use crate::storage::keys::{block_prefix, parse_block_range};
    use crate::storage::wal::{SyncMode, WalConfig};
    use crossbeam::channel::bounded;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<Store> {
        Arc::new(
            Store::open(
                dir.path(),
                WalConfig {
                    segment_size: 1 << 20,
                    sync_mode: SyncMode::None,
                    ..WalConfig::default()
                },
            )
            .unwrap(),
        )
    }

    fn numeric_config(block_size: usize) -> SeriesConfig {
        let mut config = SeriesConfig::new("dev/temp")
            .with_data_type(DataType::Numeric)
            .with_value_codec(ValueCodecKind::Xor)
            .with_block_codec(BlockCodecKind::Lz4)
            .with_block_size(block_size);
        config.series_number = 3;
        config
    }

    #[test]
    fn test_buffer_fill_and_take() {
        let mut buffer = IngestionBuffer::new(3);
        assert!(!buffer.push(Measurement::new(5, 1.0)));
        assert!(!buffer.push(Measurement::new(2, 2.0)));
        assert_eq!(buffer.latest().unwrap().timestamp, 5);
        assert_eq!(buffer.earliest().unwrap().timestamp, 2);
        assert_eq!(buffer.in_range(3, 10).count(), 1);
        assert!(buffer.push(Measurement::new(9, 3.0)));
        let taken = buffer.take();
        assert_eq!(taken.len(), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
    }

    #[test]
    fn test_write_block_key_carries_range() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let config = numeric_config(4);
        let key = write_block(
            &store,
            &config,
            vec![Measurement::new(30, 1.0), Measurement::new(10, 2.0)],
        )
        .unwrap();
        assert!(key.starts_with(&block_prefix("NUMERIC", 3)));
        assert_eq!(parse_block_range(&key).unwrap(), (10, 30));
    }

    #[test]
    fn test_write_block_merges_on_collision() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let config = numeric_config(2);
        let batch = || vec![Measurement::new(1, 1.0), Measurement::new(2, 2.0)];
        let first = write_block(&store, &config, batch()).unwrap();
        let second = write_block(&store, &config, batch()).unwrap();
        assert_eq!(first, second);

        let payload = store.get(first.as_bytes()).unwrap().unwrap();
        let decoded = decode_block(
            &payload,
            config.data_type.column_type().unwrap(),
            config.value_codec,
            config.block_codec,
        )
        .unwrap();
        assert_eq!(decoded.len(), 4);
    }

    #[test]
    fn test_merge_keeps_stored_values() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let readings = || {
            vec![
                Measurement::new(1, 21.13),
                Measurement::new(2, 21.37),
                Measurement::new(3, 20.91),
            ]
        };
        for codec in [ValueCodecKind::Xor, ValueCodecKind::DeltaDelta] {
            let mut config = numeric_config(3).with_value_codec(codec);
            config.series_number = codec as u32 + 10;
            let key = write_block(&store, &config, readings()).unwrap();
            write_block(&store, &config, readings()).unwrap();

            let payload = store.get(key.as_bytes()).unwrap().unwrap();
            let merged = decode_block(
                &payload,
                config.data_type.column_type().unwrap(),
                config.value_codec,
                config.block_codec,
            )
            .unwrap();
            assert_eq!(merged.len(), 6);
            for (got, want) in merged.iter().zip(readings().iter().chain(readings().iter())) {
                assert_eq!(got.timestamp, want.timestamp);
                let (got, want) = (got.value.as_f64().unwrap(), want.value.as_f64().unwrap());
                if codec == ValueCodecKind::Xor {
                    assert_eq!(got, want);
                } else {
                    assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
                }
            }
        }
    }

    #[test]
    fn test_huge_capacity_allocates_lazily() {
        let mut buffer = IngestionBuffer::new(usize::MAX);
        assert!(!buffer.push(Measurement::new(1, 1.0)));
        assert_eq!(buffer.take().len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_write_block_requires_type() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let config = SeriesConfig::new("dev/untyped");
        assert!(matches!(
            write_block(&store, &config, vec![Measurement::new(1, 1.0)]),
            Err(EdgeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_consumer_flushes_full_and_partial_buffers() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let stats = Arc::new(EdgeStats::default());
        let state = Arc::new(SeriesState::new(numeric_config(4)));
        let (sender, receiver) = bounded(16);
        let handle =
            spawn_consumer(state.clone(), store.clone(), stats.clone(), receiver).unwrap();

        for i in 0..6 {
            sender.send(Measurement::new(i, i as f64)).unwrap();
        }
        drop(sender);
        handle.join().unwrap();

        assert_eq!(stats.blocks_flushed(), 2);
        assert_eq!(stats.flush_errors(), 0);
        assert!(state.buffer.lock().is_empty());
        let keys = store.keys_with_prefix(block_prefix("NUMERIC", 3).as_bytes()).unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_failed_flush_still_resets_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let stats = EdgeStats::default();
        let state = SeriesState::new(SeriesConfig::new("dev/untyped").with_block_size(2));
        let mut buffer = state.buffer.lock();
        buffer.push(Measurement::new(1, 1.0));
        flush(&store, &state, &mut buffer, &stats);
        assert!(buffer.is_empty());
        assert_eq!(stats.flush_errors(), 1);
    }
}
