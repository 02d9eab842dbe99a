//! Ordered key-value store.
//!
//! A `BTreeMap` guarded by a `parking_lot::RwLock`, made durable by the
//! write-ahead log in [`wal`](crate::storage::wal). Writes are appended to
//! the log and then applied to the map while the log lock is held, so the
//! map always reflects a prefix of the log.
//!
//! Once the log spans more than `max_segments` files, the store rewrites it
//! as a snapshot of the live keys. This happens on open and after a commit.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{EdgeError, Result};
use crate::storage::wal::{Wal, WalConfig, WalOp};

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Reverse,
}

/// A key-value pair copied out of the store.
pub type Entry = (Vec<u8>, Vec<u8>);

/// Counters maintained by the store.
#[derive(Debug, Default)]
pub struct StoreStats {
    puts: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
}

impl StoreStats {
    /// Number of put ops applied.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of delete ops applied.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Number of WAL records written.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

/// Summary of one applied commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Puts that created a new key.
    pub inserted: usize,
    /// Deletes that removed an existing key.
    pub removed: usize,
}

/// Durable ordered map.
pub struct Store {
    dir: PathBuf,
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// `None` once closed.
    wal: Mutex<Option<Wal>>,
    closed: AtomicBool,
    stats: StoreStats,
}

impl Store {
    /// Opens the store in `dir`, replaying its log.
    pub fn open(dir: impl AsRef<Path>, config: WalConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let wal_dir = dir.join("wal");

        let records = Wal::recover(&wal_dir)?;
        let mut map = BTreeMap::new();
        let mut next_sequence = 1;
        for record in &records {
            for op in &record.ops {
                apply_op(&mut map, op.clone());
            }
            next_sequence = record.sequence + 1;
        }
        debug!(
            "Opened store at {} with {} keys from {} records",
            dir.display(),
            map.len(),
            records.len()
        );

        let mut wal = Wal::new(&wal_dir, config, next_sequence)?;
        if wal.needs_checkpoint() {
            debug!(
                "Compacting {} WAL segments at {}",
                wal.segment_count(),
                wal_dir.display()
            );
            wal.checkpoint(snapshot(&map))?;
        }
        Ok(Self {
            dir,
            map: RwLock::new(map),
            wal: Mutex::new(Some(wal)),
            closed: AtomicBool::new(false),
            stats: StoreStats::default(),
        })
    }

    /// Directory the store lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns true once [`Store::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EdgeError::Closed("store".to_string()));
        }
        Ok(())
    }

    /// Atomically applies `ops`: one WAL record, one map update.
    pub fn apply(&self, ops: Vec<WalOp>) -> Result<ApplyOutcome> {
        if ops.is_empty() {
            self.check_open()?;
            return Ok(ApplyOutcome::default());
        }
        let mut wal_guard = self.wal.lock();
        let wal = wal_guard
            .as_mut()
            .ok_or_else(|| EdgeError::Closed("store".to_string()))?;
        wal.append(&ops)?;

        let mut outcome = ApplyOutcome::default();
        let mut map = self.map.write();
        for op in ops {
            match &op {
                WalOp::Put { .. } => self.stats.puts.fetch_add(1, Ordering::Relaxed),
                WalOp::Delete { .. } => self.stats.deletes.fetch_add(1, Ordering::Relaxed),
            };
            let is_put = matches!(op, WalOp::Put { .. });
            let existed = apply_op(&mut map, op);
            if is_put && !existed {
                outcome.inserted += 1;
            } else if !is_put && existed {
                outcome.removed += 1;
            }
        }
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        if wal.needs_checkpoint() {
            wal.checkpoint(snapshot(&map))?;
        }
        Ok(outcome)
    }

    /// Writes one key.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.apply(vec![WalOp::put(key, value)]).map(|_| ())
    }

    /// Removes one key.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.apply(vec![WalOp::delete(key)]).map(|_| ())
    }

    /// Reads one key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.map.read().get(key).cloned())
    }

    /// Copies up to `limit` entries within the bounds, in `direction` order.
    pub fn range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        self.check_open()?;
        if bounds_empty(lower, upper) {
            return Ok(Vec::new());
        }
        let map = self.map.read();
        let range = map.range::<[u8], _>((lower, upper));
        let copy = |(k, v): (&Vec<u8>, &Vec<u8>)| (k.clone(), v.clone());
        Ok(match direction {
            Direction::Forward => range.take(limit).map(copy).collect(),
            Direction::Reverse => range.rev().take(limit).map(copy).collect(),
        })
    }

    /// Keys starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.check_open()?;
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Entries starting with `prefix`, in order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Entry>> {
        self.check_open()?;
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// First entry starting with `prefix`.
    pub fn first_with_prefix(&self, prefix: &[u8]) -> Result<Option<Entry>> {
        self.check_open()?;
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Last entry starting with `prefix`.
    pub fn last_with_prefix(&self, prefix: &[u8]) -> Result<Option<Entry>> {
        self.check_open()?;
        let map = self.map.read();
        let entry = match prefix_successor(prefix) {
            Some(upper) => map
                .range::<[u8], _>((Bound::Included(prefix), Bound::Excluded(upper.as_slice())))
                .next_back(),
            None => map
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                .next_back(),
        };
        Ok(entry
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Total size of keys and values in bytes.
    pub fn approximate_bytes(&self) -> usize {
        self.map
            .read()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Store counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Flushes and fsyncs the log.
    pub fn sync(&self) -> Result<()> {
        let mut wal_guard = self.wal.lock();
        let wal = wal_guard
            .as_mut()
            .ok_or_else(|| EdgeError::Closed("store".to_string()))?;
        wal.sync()
    }

    /// Rewrites the log as a snapshot of the live keys.
    pub fn checkpoint(&self) -> Result<()> {
        let mut wal_guard = self.wal.lock();
        let wal = wal_guard
            .as_mut()
            .ok_or_else(|| EdgeError::Closed("store".to_string()))?;
        let snapshot = snapshot(&self.map.read());
        wal.checkpoint(snapshot)
    }

    /// Syncs and closes the log. Later operations fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut wal_guard = self.wal.lock();
        self.closed.store(true, Ordering::Release);
        if let Some(mut wal) = wal_guard.take() {
            wal.sync()?;
            debug!("Closed store at {}", self.dir.display());
        }
        Ok(())
    }
}

/// Applies one op, returning whether the key existed before.
fn apply_op(map: &mut BTreeMap<Vec<u8>, Vec<u8>>, op: WalOp) -> bool {
    match op {
        WalOp::Put { key, value } => map.insert(key, value).is_some(),
        WalOp::Delete { key } => map.remove(&key).is_some(),
    }
}

fn snapshot(map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Vec<WalOp> {
    map.iter()
        .map(|(k, v)| WalOp::put(k.clone(), v.clone()))
        .collect()
}

/// `BTreeMap::range` panics on inverted bounds.
fn bounds_empty(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}
