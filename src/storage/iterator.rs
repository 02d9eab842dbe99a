//! Range iterators over record keys.
//!
//! [`StoreIterator`] walks the record keyspace between two timestamps in
//! either direction, loading entries from the store in chunks and skipping
//! ids that do not match its [`Pattern`]. Decorators narrow the stream:
//! [`LimitIterator`] caps the number of results and [`FilterIterator`]
//! rejects entries by quality or metadata.
//!
//! ```text
//! loop {
//!     if !iter.advance() { break }
//!     let key = iter.key();
//!     let value = iter.value();
//! }
//! if let Some(err) = iter.error() { ... }
//! ```

use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::{EdgeError, Result};
use crate::storage::keys::{
    decode_record_key, record_bound, Metadata, Quality, ValueRecord, RECORD_PREFIX,
};
use crate::storage::store::{Direction, Entry, Store};

/// Entries fetched from the store per chunk, unless overridden.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Decoded record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Series id.
    pub series_id: String,
    /// Timestamp in nanoseconds.
    pub timestamp: i64,
}

/// Iterator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Positioned on a bound or an entry; `advance` may yield more.
    Positioned,
    /// No more entries, or an error was latched.
    Exhausted,
    /// Closed by the caller.
    Closed,
}

/// Cursor over `(RecordKey, ValueRecord)` pairs.
pub trait RecordIterator: Send {
    /// Moves to the next accepted entry. Returns false at the end, after
    /// `close`, or once an error is latched.
    fn advance(&mut self) -> bool;

    /// Key of the current entry.
    fn key(&self) -> Option<&RecordKey>;

    /// Value of the current entry.
    fn value(&self) -> Option<&ValueRecord>;

    /// Releases the cursor. Idempotent.
    fn close(&mut self);

    /// Error that stopped iteration, if any.
    fn error(&self) -> Option<&EdgeError>;

    /// Moves the latched error out.
    fn take_error(&mut self) -> Option<EdgeError>;

    /// Current state.
    fn state(&self) -> IteratorState;
}

/// Series id pattern.
///
/// A pattern containing `*` is a glob: `*` matches any run of characters
/// except `/` and `?` matches one such character, so a glob over a
/// `/`-separated path matches segment by segment and only paths with the
/// same number of segments. Without a `*`, the pattern is an exact id and
/// `?` is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches every id.
    All,
    /// Matches one id.
    Exact(String),
    /// Wildcard pattern.
    Glob(String),
}

impl Pattern {
    /// Parses a pattern string.
    pub fn new(pattern: &str) -> Self {
        if pattern == "*" {
            Self::All
        } else if pattern.contains('*') {
            Self::Glob(pattern.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    /// Returns true if `id` matches.
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(exact) => exact == id,
            Self::Glob(glob) => glob_match(glob.as_bytes(), id.as_bytes()),
        }
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') if text[t] != b'/' => {
                p += 1;
                t += 1;
                continue;
            }
            Some(&c) if c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }
        // Let the last star absorb one more character, unless it is a separator.
        match backtrack {
            Some((star, matched)) if text[matched] != b'/' => {
                backtrack = Some((star, matched + 1));
                p = star + 1;
                t = matched + 1;
            }
            _ => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// Iterator over the record keys of a store.
pub struct StoreIterator {
    store: Arc<Store>,
    direction: Direction,
    pattern: Pattern,
    lower: Vec<u8>,
    /// Exclusive.
    upper: Vec<u8>,
    /// Last key handed out by the store.
    cursor: Option<Vec<u8>>,
    chunk_size: usize,
    chunk: VecDeque<Entry>,
    drained: bool,
    current: Option<(RecordKey, ValueRecord)>,
    error: Option<EdgeError>,
    state: IteratorState,
}

impl StoreIterator {
    /// Creates an iterator over records with `start <= ts <= end`.
    pub fn new(
        store: Arc<Store>,
        pattern: Pattern,
        start: i64,
        end: i64,
        direction: Direction,
    ) -> Self {
        let upper = match end.checked_add(1) {
            Some(next) => record_bound(next),
            None => vec![RECORD_PREFIX + 1],
        };
        Self {
            store,
            direction,
            pattern,
            lower: record_bound(start),
            upper,
            cursor: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk: VecDeque::new(),
            drained: false,
            current: None,
            error: None,
            state: IteratorState::Positioned,
        }
    }

    /// Sets how many entries each trip to the store copies out.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Ascending iterator.
    pub fn forward(store: Arc<Store>, pattern: Pattern, start: i64, end: i64) -> Self {
        Self::new(store, pattern, start, end, Direction::Forward)
    }

    /// Descending iterator.
    pub fn reverse(store: Arc<Store>, pattern: Pattern, start: i64, end: i64) -> Self {
        Self::new(store, pattern, start, end, Direction::Reverse)
    }

    fn fill(&mut self) -> Result<()> {
        let cursor = self.cursor.as_deref();
        let (lower, upper) = match self.direction {
            Direction::Forward => (
                cursor.map_or(Bound::Included(self.lower.as_slice()), Bound::Excluded),
                Bound::Excluded(self.upper.as_slice()),
            ),
            Direction::Reverse => (
                Bound::Included(self.lower.as_slice()),
                Bound::Excluded(cursor.unwrap_or(self.upper.as_slice())),
            ),
        };
        let entries = self.store.range(lower, upper, self.direction, self.chunk_size)?;
        if entries.len() < self.chunk_size {
            self.drained = true;
        }
        if let Some((key, _)) = entries.last() {
            self.cursor = Some(key.clone());
        }
        self.chunk.extend(entries);
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.chunk.is_empty() && !self.drained {
            self.fill()?;
        }
        Ok(self.chunk.pop_front())
    }

    fn step(&mut self) -> Result<Option<(RecordKey, ValueRecord)>> {
        while let Some((key, value)) = self.next_entry()? {
            let (timestamp, id) = decode_record_key(&key)?;
            if !self.pattern.matches(id) {
                continue;
            }
            let record = ValueRecord::decode(&value)?;
            return Ok(Some((
                RecordKey {
                    series_id: id.to_string(),
                    timestamp,
                },
                record,
            )));
        }
        Ok(None)
    }
}

impl RecordIterator for StoreIterator {
    fn advance(&mut self) -> bool {
        if self.state != IteratorState::Positioned {
            return false;
        }
        match self.step() {
            Ok(Some(entry)) => {
                self.current = Some(entry);
                true
            }
            Ok(None) => {
                self.current = None;
                self.state = IteratorState::Exhausted;
                false
            }
            Err(err) => {
                self.current = None;
                self.error = Some(err);
                self.state = IteratorState::Exhausted;
                false
            }
        }
    }

    fn key(&self) -> Option<&RecordKey> {
        self.current.as_ref().map(|(k, _)| k)
    }

    fn value(&self) -> Option<&ValueRecord> {
        self.current.as_ref().map(|(_, v)| v)
    }

    fn close(&mut self) {
        self.state = IteratorState::Closed;
        self.current = None;
        self.chunk.clear();
    }

    fn error(&self) -> Option<&EdgeError> {
        self.error.as_ref()
    }

    fn take_error(&mut self) -> Option<EdgeError> {
        self.error.take()
    }

    fn state(&self) -> IteratorState {
        self.state
    }
}

/// Stops after a fixed number of entries.
pub struct LimitIterator {
    inner: Box<dyn RecordIterator>,
    limit: usize,
    count: usize,
}

impl LimitIterator {
    /// Wraps `inner`, yielding at most `limit` entries.
    pub fn new(inner: Box<dyn RecordIterator>, limit: usize) -> Self {
        Self {
            inner,
            limit,
            count: 0,
        }
    }
}

impl RecordIterator for LimitIterator {
    fn advance(&mut self) -> bool {
        if self.count >= self.limit {
            return false;
        }
        if self.inner.advance() {
            self.count += 1;
            true
        } else {
            false
        }
    }

    fn key(&self) -> Option<&RecordKey> {
        self.inner.key()
    }

    fn value(&self) -> Option<&ValueRecord> {
        self.inner.value()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn error(&self) -> Option<&EdgeError> {
        self.inner.error()
    }

    fn take_error(&mut self) -> Option<EdgeError> {
        self.inner.take_error()
    }

    fn state(&self) -> IteratorState {
        match self.inner.state() {
            IteratorState::Positioned if self.count >= self.limit => IteratorState::Exhausted,
            state => state,
        }
    }
}

/// Rejects entries by quality and metadata.
pub struct FilterIterator {
    inner: Box<dyn RecordIterator>,
    quality: Option<Quality>,
    metadata: Option<Metadata>,
}

impl FilterIterator {
    /// Wraps `inner`. `None` filters accept everything.
    pub fn new(
        inner: Box<dyn RecordIterator>,
        quality: Option<Quality>,
        metadata: Option<Metadata>,
    ) -> Self {
        Self {
            inner,
            quality,
            metadata,
        }
    }

    fn accepts(&self, value: &ValueRecord) -> bool {
        if self.quality.is_some_and(|q| q != value.quality) {
            return false;
        }
        match &self.metadata {
            Some(filter) => value.matches_metadata(filter),
            None => true,
        }
    }
}

impl RecordIterator for FilterIterator {
    fn advance(&mut self) -> bool {
        while self.inner.advance() {
            if self.inner.value().is_some_and(|v| self.accepts(v)) {
                return true;
            }
        }
        false
    }

    fn key(&self) -> Option<&RecordKey> {
        self.inner.key()
    }

    fn value(&self) -> Option<&ValueRecord> {
        self.inner.value()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn error(&self) -> Option<&EdgeError> {
        self.inner.error()
    }

    fn take_error(&mut self) -> Option<EdgeError> {
        self.inner.take_error()
    }

    fn state(&self) -> IteratorState {
        self.inner.state()
    }
}

/// Iterator with no entries.
#[derive(Debug)]
pub struct EmptyIterator {
    closed: bool,
}

impl EmptyIterator {
    /// Creates an empty iterator.
    pub fn new() -> Self {
        Self { closed: false }
    }
}

impl Default for EmptyIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordIterator for EmptyIterator {
    fn advance(&mut self) -> bool {
        false
    }

    fn key(&self) -> Option<&RecordKey> {
        None
    }

    fn value(&self) -> Option<&ValueRecord> {
        None
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn error(&self) -> Option<&EdgeError> {
        None
    }

    fn take_error(&mut self) -> Option<EdgeError> {
        None
    }

    fn state(&self) -> IteratorState {
        if self.closed {
            IteratorState::Closed
        } else {
            IteratorState::Exhausted
        }
    }
}

/// Drains `iter`, returning its latched error if it stopped on one.
pub fn collect_records(
    mut iter: Box<dyn RecordIterator>,
) -> Result<Vec<(RecordKey, ValueRecord)>> {
    let mut out = Vec::new();
    while iter.advance() {
        if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
            out.push((key.clone(), value.clone()));
        }
    }
    iter.close();
    if let Some(err) = iter.take_error() {
        return Err(err);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::keys::record_key;
    use crate::storage::wal::{SyncMode, WalConfig};
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

    fn put(store: &Store, id: &str, ts: i64, value: f64, quality: Quality) {
        let record = ValueRecord::new(value, quality);
        store
            .put(record_key(id, ts), record.encode().unwrap())
            .unwrap();
    }

    fn drain(iter: Box<dyn RecordIterator>) -> Vec<(String, i64)> {
        collect_records(iter)
            .unwrap()
            .into_iter()
            .map(|(k, _)| (k.series_id, k.timestamp))
            .collect()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(Pattern::new("*").matches("anything/at/all"));
        assert!(Pattern::new("temp").matches("temp"));
        assert!(!Pattern::new("temp").matches("temp2"));
        assert!(Pattern::new("temp*").matches("temp.living"));
        assert!(Pattern::new("*.humidity").matches("room1.humidity"));
        assert!(!Pattern::new("*.humidity").matches("room1.temp"));
        assert!(Pattern::new("sensor?*").matches("sensor7"));
        assert!(Pattern::new("sensor?*").matches("sensor77"));
        assert!(!Pattern::new("sensor?*").matches("sensor"));
    }

    #[test]
    fn test_question_mark_alone_is_literal() {
        let pattern = Pattern::new("a?c");
        assert_eq!(pattern, Pattern::Exact("a?c".to_string()));
        assert!(pattern.matches("a?c"));
        assert!(!pattern.matches("abc"));
    }

    #[test]
    fn test_pattern_path_segments() {
        let pattern = Pattern::new("building/*/temperature");
        assert!(pattern.matches("building/floor1/temperature"));
        assert!(!pattern.matches("building/floor1/room2/temperature"));
        assert!(!pattern.matches("building/floor1/humidity"));

        let pattern = Pattern::new("device_*/*");
        assert!(pattern.matches("device_01/temp"));
        assert!(!pattern.matches("device_01/temp/raw"));
        assert!(!pattern.matches("device_01"));
    }

    #[test]
    fn test_forward_and_reverse_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        for ts in [-20, -5, 0, 7, 30] {
            put(&store, "a", ts, ts as f64, Quality::Good);
        }
        put(&store, "b", 0, 1.0, Quality::Good);

        let forward = drain(Box::new(StoreIterator::forward(
            store.clone(),
            Pattern::new("a"),
            -10,
            10,
        )));
        assert_eq!(
            forward,
            vec![("a".into(), -5), ("a".into(), 0), ("a".into(), 7)]
        );

        let reverse = drain(Box::new(StoreIterator::reverse(
            store,
            Pattern::All,
            i64::MIN,
            i64::MAX,
        )));
        let times: Vec<i64> = reverse.iter().map(|(_, ts)| *ts).collect();
        assert_eq!(times, vec![30, 7, 0, 0, -5, -20]);
    }

    #[test]
    fn test_iteration_crosses_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let total = DEFAULT_CHUNK_SIZE * 2 + 17;
        for i in 0..total as i64 {
            put(&store, if i % 2 == 0 { "even" } else { "odd" }, i, 0.0, Quality::Good);
        }
        let evens = drain(Box::new(StoreIterator::forward(
            store.clone(),
            Pattern::new("even"),
            0,
            i64::MAX,
        )));
        assert_eq!(evens.len(), (total + 1) / 2);
        assert!(evens.windows(2).all(|w| w[0].1 < w[1].1));

        let all = drain(Box::new(StoreIterator::reverse(store, Pattern::All, 0, i64::MAX)));
        assert_eq!(all.len(), total);
        assert!(all.windows(2).all(|w| w[0].1 > w[1].1));
    }

    #[test]
    fn test_small_chunks_visit_every_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        for ts in 0..7 {
            put(&store, "s", ts, ts as f64, Quality::Good);
        }
        for chunk_size in [0, 1, 2, 7] {
            let forward = drain(Box::new(
                StoreIterator::forward(store.clone(), Pattern::All, 0, 100)
                    .with_chunk_size(chunk_size),
            ));
            assert_eq!(forward.len(), 7, "chunk size {}", chunk_size);
            let reverse = drain(Box::new(
                StoreIterator::reverse(store.clone(), Pattern::All, 0, 100)
                    .with_chunk_size(chunk_size),
            ));
            assert_eq!(reverse.first().map(|r| r.1), Some(6));
            assert_eq!(reverse.len(), 7);
        }
    }

    #[test]
    fn test_end_is_inclusive() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        put(&store, "x", 10, 1.0, Quality::Good);
        put(&store, "x", i64::MAX, 2.0, Quality::Good);
        let hits = drain(Box::new(StoreIterator::forward(store.clone(), Pattern::All, 10, 10)));
        assert_eq!(hits, vec![("x".into(), 10)]);
        let hits = drain(Box::new(StoreIterator::forward(store, Pattern::All, 11, i64::MAX)));
        assert_eq!(hits, vec![("x".into(), i64::MAX)]);
    }

    #[test]
    fn test_limit_and_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        for ts in 0..10 {
            let quality = if ts % 3 == 0 { Quality::Bad } else { Quality::Good };
            put(&store, "s", ts, ts as f64, quality);
        }
        let base = Box::new(StoreIterator::forward(store.clone(), Pattern::All, 0, 100));
        let mut limited = LimitIterator::new(base, 4);
        let mut count = 0;
        while limited.advance() {
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(limited.state(), IteratorState::Exhausted);

        let base = Box::new(StoreIterator::forward(store, Pattern::All, 0, 100));
        let filtered = FilterIterator::new(base, Some(Quality::Bad), None);
        let hits = drain(Box::new(filtered));
        let times: Vec<i64> = hits.iter().map(|(_, ts)| *ts).collect();
        assert_eq!(times, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_metadata_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let mut metadata = Metadata::new();
        metadata.insert("site".into(), "north".into());
        let record = ValueRecord {
            value: 1.0,
            quality: Quality::Good,
            metadata: Some(metadata.clone()),
        };
        store.put(record_key("m", 1), record.encode().unwrap()).unwrap();
        put(&store, "m", 2, 2.0, Quality::Good);

        let base = Box::new(StoreIterator::forward(store, Pattern::All, 0, 10));
        let hits = drain(Box::new(FilterIterator::new(base, None, Some(metadata))));
        assert_eq!(hits, vec![("m".into(), 1)]);
    }

    #[test]
    fn test_corrupt_value_latches_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        put(&store, "ok", 1, 1.0, Quality::Good);
        store.put(record_key("bad", 2), vec![1, 2, 3]).unwrap();
        put(&store, "ok", 3, 3.0, Quality::Good);

        let mut iter = StoreIterator::forward(store, Pattern::All, 0, 10);
        assert!(iter.advance());
        assert!(!iter.advance());
        assert!(matches!(iter.error(), Some(EdgeError::Corrupted(_))));
        assert!(!iter.advance());
        assert_eq!(iter.state(), IteratorState::Exhausted);
    }

    #[test]
    fn test_close_and_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        put(&store, "a", 1, 1.0, Quality::Good);
        let mut iter = StoreIterator::forward(store, Pattern::All, 0, 10);
        assert_eq!(iter.state(), IteratorState::Positioned);
        iter.close();
        assert!(!iter.advance());
        assert!(iter.key().is_none());
        assert_eq!(iter.state(), IteratorState::Closed);

        let mut empty = EmptyIterator::new();
        assert!(!empty.advance());
        assert!(empty.error().is_none());
        empty.close();
        assert_eq!(empty.state(), IteratorState::Closed);
    }
}
