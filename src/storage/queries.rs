//! Analytical queries over record keys.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EdgeError, Result};
use crate::storage::db::SensorDb;
use crate::storage::iterator::{RecordIterator, RecordKey};
use crate::storage::keys::{Quality, ValueRecord};

/// Summary of one series over a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorStats {
    /// Series id.
    pub series_id: String,
    /// Number of records.
    pub count: u64,
    /// Smallest value, 0 when empty.
    pub min: f64,
    /// Largest value, 0 when empty.
    pub max: f64,
    /// Arithmetic mean, 0 when empty.
    pub mean: f64,
    /// Timestamp of the oldest record.
    pub first_timestamp: Option<i64>,
    /// Timestamp of the newest record.
    pub last_timestamp: Option<i64>,
    /// Records per quality code.
    pub quality: BTreeMap<Quality, u64>,
}

/// Aggregates of one time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Start of the bucket.
    pub timestamp: i64,
    /// Mean value.
    pub avg: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Sum of values.
    pub sum: f64,
    /// Number of values.
    pub count: u64,
    /// Population standard deviation.
    pub stddev: f64,
}

/// Query helpers borrowed from a [`SensorDb`].
pub struct Queries<'a> {
    db: &'a SensorDb,
}

impl SensorDb {
    /// Analytical queries over this database.
    pub fn queries(&self) -> Queries<'_> {
        Queries { db: self }
    }
}

fn next_entry(iter: &mut dyn RecordIterator) -> Result<Option<(RecordKey, ValueRecord)>> {
    if iter.advance() {
        if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
            return Ok(Some((key.clone(), value.clone())));
        }
    }
    iter.close();
    match iter.take_error() {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

fn for_each(
    mut iter: Box<dyn RecordIterator>,
    mut f: impl FnMut(&RecordKey, &ValueRecord),
) -> Result<()> {
    while iter.advance() {
        if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
            f(key, value);
        }
    }
    iter.close();
    match iter.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl Queries<'_> {
    /// Oldest record of `series_id`.
    pub fn first(&self, series_id: &str) -> Result<Option<(RecordKey, ValueRecord)>> {
        let mut iter = self.db.query_range_limit(series_id, i64::MIN, i64::MAX, 1)?;
        next_entry(iter.as_mut())
    }

    /// Newest record of `series_id`.
    pub fn last(&self, series_id: &str) -> Result<Option<(RecordKey, ValueRecord)>> {
        let mut iter = self.db.query_range_reverse(series_id, i64::MIN, i64::MAX)?;
        next_entry(iter.as_mut())
    }

    /// Count, extremes, mean and quality distribution of `series_id`.
    pub fn sensor_stats(&self, series_id: &str, start: i64, end: i64) -> Result<SensorStats> {
        let mut stats = SensorStats {
            series_id: series_id.to_string(),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            first_timestamp: None,
            last_timestamp: None,
            quality: BTreeMap::new(),
        };
        let mut sum = 0.0;
        for_each(self.db.query_range(series_id, start, end)?, |key, value| {
            stats.count += 1;
            sum += value.value;
            stats.min = stats.min.min(value.value);
            stats.max = stats.max.max(value.value);
            stats.first_timestamp.get_or_insert(key.timestamp);
            stats.last_timestamp = Some(key.timestamp);
            *stats.quality.entry(value.quality).or_default() += 1;
        })?;
        if stats.count == 0 {
            stats.min = 0.0;
            stats.max = 0.0;
        } else {
            stats.mean = sum / stats.count as f64;
        }
        Ok(stats)
    }

    /// Sorted distinct series ids matching `pattern`.
    pub fn list_sensors(&self, pattern: &str) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        for_each(self.db.query_range(pattern, i64::MIN, i64::MAX)?, |key, _| {
            ids.insert(key.series_id.clone());
        })?;
        Ok(ids.into_iter().collect())
    }

    /// Per-bucket aggregates with buckets of `interval` nanoseconds,
    /// aligned to multiples of `interval`.
    pub fn aggregate(
        &self,
        series_id: &str,
        start: i64,
        end: i64,
        interval: i64,
    ) -> Result<Vec<Aggregate>> {
        if interval <= 0 {
            return Err(EdgeError::LimitExceeded(format!(
                "aggregation interval must be positive, got {}",
                interval
            )));
        }
        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for_each(self.db.query_range(series_id, start, end)?, |key, value| {
            buckets
                .entry(key.timestamp.div_euclid(interval))
                .or_default()
                .push(value.value);
        })?;

        Ok(buckets
            .into_iter()
            .map(|(bucket, values)| {
                let count = values.len() as f64;
                let sum: f64 = values.iter().sum();
                let avg = sum / count;
                let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count;
                Aggregate {
                    timestamp: bucket.saturating_mul(interval),
                    avg,
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    sum,
                    count: values.len() as u64,
                    stddev: variance.sqrt(),
                }
            })
            .collect())
    }

    /// Records whose value is more than `threshold` standard deviations
    /// from the mean of the range.
    pub fn find_anomalies(
        &self,
        series_id: &str,
        start: i64,
        end: i64,
        threshold: f64,
    ) -> Result<Vec<RecordKey>> {
        let stats = self.sensor_stats(series_id, start, end)?;
        if stats.count == 0 {
            return Ok(Vec::new());
        }
        let mut squares = 0.0;
        for_each(self.db.query_range(series_id, start, end)?, |_, value| {
            squares += (value.value - stats.mean).powi(2);
        })?;
        let limit = (squares / stats.count as f64).sqrt() * threshold;

        let mut anomalies = Vec::new();
        for_each(self.db.query_range(series_id, start, end)?, |key, value| {
            if (value.value - stats.mean).abs() > limit {
                anomalies.push(key.clone());
            }
        })?;
        Ok(anomalies)
    }

    /// Records matching `pattern` in the range.
    pub fn count(&self, pattern: &str, start: i64, end: i64) -> Result<u64> {
        let mut count = 0;
        for_each(self.db.query_range(pattern, start, end)?, |_, _| count += 1)?;
        Ok(count)
    }

    /// Returns true if `series_id` has a record in the range.
    pub fn has_data(&self, series_id: &str, start: i64, end: i64) -> Result<bool> {
        let mut iter = self.db.query_range_limit(series_id, start, end, 1)?;
        Ok(next_entry(iter.as_mut())?.is_some())
    }

    /// Records within `window / 2` of `center`.
    pub fn window(
        &self,
        series_id: &str,
        center: i64,
        window: i64,
    ) -> Result<Box<dyn RecordIterator>> {
        let half = window / 2;
        self.db.query_range(
            series_id,
            center.saturating_sub(half),
            center.saturating_add(half),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use tempfile::TempDir;

    fn seeded(dir: &TempDir) -> SensorDb {
        let db = SensorDb::open(dir.path(), Options::default()).unwrap();
        for (ts, value) in [(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0)] {
            db.insert("cpu", value, ts).unwrap();
        }
        db.insert_with_quality("cpu", 100.0, Quality::Bad, 50, None)
            .unwrap();
        db.insert("mem", 5.0, 15).unwrap();
        db
    }

    #[test]
    fn test_first_and_last() {
        let temp_dir = TempDir::new().unwrap();
        let db = seeded(&temp_dir);
        let (key, value) = db.queries().first("cpu").unwrap().unwrap();
        assert_eq!((key.timestamp, value.value), (10, 1.0));
        let (key, value) = db.queries().last("cpu").unwrap().unwrap();
        assert_eq!((key.timestamp, value.value), (50, 100.0));
        assert!(db.queries().first("disk").unwrap().is_none());
    }

    #[test]
    fn test_sensor_stats() {
        let temp_dir = TempDir::new().unwrap();
        let db = seeded(&temp_dir);
        let stats = db.queries().sensor_stats("cpu", 0, 40).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.first_timestamp, Some(10));
        assert_eq!(stats.last_timestamp, Some(40));
        assert_eq!(stats.quality.get(&Quality::Good), Some(&4));

        let empty = db.queries().sensor_stats("cpu", 1000, 2000).unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!((empty.min, empty.max, empty.mean), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_list_sensors() {
        let temp_dir = TempDir::new().unwrap();
        let db = seeded(&temp_dir);
        assert_eq!(db.queries().list_sensors("*").unwrap(), vec!["cpu", "mem"]);
        assert_eq!(db.queries().list_sensors("m*").unwrap(), vec!["mem"]);
    }

    #[test]
    fn test_aggregate() {
        let temp_dir = TempDir::new().unwrap();
        let db = seeded(&temp_dir);
        let buckets = db.queries().aggregate("cpu", 0, 40, 20).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].timestamp, 0);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[1].timestamp, 20);
        assert_eq!(buckets[1].sum, 5.0);
        assert_eq!(buckets[1].avg, 2.5);
        assert_eq!(buckets[1].stddev, 0.5);
        assert_eq!(buckets[2].min, 4.0);

        assert!(matches!(
            db.queries().aggregate("cpu", 0, 40, 0),
            Err(EdgeError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_aggregate_negative_timestamps() {
        let temp_dir = TempDir::new().unwrap();
        let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
        db.insert("n", 1.0, -5).unwrap();
        db.insert("n", 3.0, 5).unwrap();
        let buckets = db.queries().aggregate("n", -10, 10, 10).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].timestamp, -10);
        assert_eq!(buckets[1].timestamp, 0);
    }

    #[test]
    fn test_anomalies_count_and_window() {
        let temp_dir = TempDir::new().unwrap();
        let db = seeded(&temp_dir);
        let anomalies = db.queries().find_anomalies("cpu", 0, 100, 1.5).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].timestamp, 50);

        assert_eq!(db.queries().count("*", 0, 100).unwrap(), 6);
        assert!(db.queries().has_data("mem", 0, 20).unwrap());
        assert!(!db.queries().has_data("mem", 16, 20).unwrap());

        let mut iter = db.queries().window("cpu", 30, 20).unwrap();
        let mut seen = Vec::new();
        while iter.advance() {
            seen.push(iter.key().unwrap().timestamp);
        }
        assert_eq!(seen, vec![20, 30, 40]);
    }
}
