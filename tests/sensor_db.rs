//! Integration tests for the record-level database.
//!
//! These tests verify:
//! - Time-major key ordering across series and negative timestamps
//! - Atomic batches that survive a reopen
//! - Retention passes
//! - Filtered, limited and reverse range queries
//! - A write-ahead log that stays bounded across restarts

use sensorwave_edge::storage::{collect_records, now_nanos, Metadata, RecordKey};
use sensorwave_edge::{EdgeError, Options, Quality, SensorDb};
use std::time::Duration;
use tempfile::TempDir;

fn keys(records: Vec<(RecordKey, sensorwave_edge::ValueRecord)>) -> Vec<(String, i64)> {
    records
        .into_iter()
        .map(|(k, _)| (k.series_id, k.timestamp))
        .collect()
}

// ============================================================================
// Ordering Tests
// ============================================================================

/// Records come back ordered by timestamp first, then series id, including
/// timestamps before the epoch.
#[test]
fn test_time_major_ordering() {
    let temp_dir = TempDir::new().unwrap();
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();

    db.insert("b", 1.0, 5).unwrap();
    db.insert("a", 2.0, 5).unwrap();
    db.insert("a", 3.0, -100).unwrap();
    db.insert("c", 4.0, 0).unwrap();
    db.insert("a", 5.0, i64::MAX).unwrap();
    db.insert("a", 6.0, i64::MIN).unwrap();

    let all = collect_records(db.query_range("*", i64::MIN, i64::MAX).unwrap()).unwrap();
    assert_eq!(
        keys(all),
        vec![
            ("a".to_string(), i64::MIN),
            ("a".to_string(), -100),
            ("c".to_string(), 0),
            ("a".to_string(), 5),
            ("b".to_string(), 5),
            ("a".to_string(), i64::MAX),
        ]
    );

    let reverse =
        collect_records(db.query_range_reverse("a", i64::MIN, i64::MAX).unwrap()).unwrap();
    let timestamps: Vec<i64> = reverse.iter().map(|(k, _)| k.timestamp).collect();
    assert_eq!(timestamps, vec![i64::MAX, 5, -100, i64::MIN]);
}

#[test]
fn test_range_bounds_are_inclusive() {
    let temp_dir = TempDir::new().unwrap();
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
    for ts in 0..10 {
        db.insert("s", ts as f64, ts).unwrap();
    }
    let found = collect_records(db.query_range("s", 3, 6).unwrap()).unwrap();
    assert_eq!(found.len(), 4);
    assert!(collect_records(db.query_range("s", 6, 3).unwrap())
        .unwrap()
        .is_empty());

    let small_chunks = SensorDb::open(
        temp_dir.path().join("chunked"),
        Options::default().with_scan_chunk_size(3),
    )
    .unwrap();
    for ts in 0..10 {
        small_chunks.insert("s", ts as f64, ts).unwrap();
    }
    assert_eq!(
        collect_records(small_chunks.query_range("s", 0, 9).unwrap())
            .unwrap()
            .len(),
        10
    );

    let limited = collect_records(db.query_range_limit("s", 0, 9, 3).unwrap()).unwrap();
    let timestamps: Vec<i64> = limited.iter().map(|(k, _)| k.timestamp).collect();
    assert_eq!(timestamps, vec![0, 1, 2]);
    assert_eq!(
        collect_records(db.query_range_limit("s", 0, 9, 0).unwrap())
            .unwrap()
            .len(),
        10
    );
}

// ============================================================================
// Batch Tests
// ============================================================================

#[test]
fn test_batch_commit_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
        let mut batch = db.new_batch();
        for i in 0..100 {
            batch.add("line.speed", i as f64, i * 1_000).unwrap();
        }
        assert_eq!(batch.size(), 100);
        let stats = db.commit_with_stats(&mut batch).unwrap();
        assert_eq!(stats.entries, 100);
        assert!(stats.bytes > 0);
        assert!(batch.is_committed());
        assert!(matches!(
            batch.add("line.speed", 1.0, 1),
            Err(EdgeError::Closed(_))
        ));
        db.close().unwrap();
    }

    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
    let found = collect_records(db.query_range("line.speed", 0, i64::MAX).unwrap()).unwrap();
    assert_eq!(found.len(), 100);
    assert_eq!(found[99].1.value, 99.0);
    assert_eq!(db.stats().unwrap().records, 100);
}

#[test]
fn test_uncommitted_batch_is_not_visible() {
    let temp_dir = TempDir::new().unwrap();
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
    let mut batch = db.new_batch();
    batch.add("s", 1.0, 1).unwrap();
    assert!(db.get("s", 1).unwrap().is_none());
    batch.reset();
    assert!(batch.is_empty());
    db.commit(&mut batch).unwrap();
    assert!(batch.is_committed());
    assert!(db.get("s", 1).unwrap().is_none());
}

#[test]
fn test_invalid_ids_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
    assert!(matches!(
        db.insert("", 1.0, 1),
        Err(EdgeError::InvalidSeriesId { .. })
    ));
    let mut batch = db.new_batch();
    assert!(batch.add(&"x".repeat(300), 1.0, 1).is_err());
}

// ============================================================================
// Retention Tests
// ============================================================================

#[test]
fn test_retention_removes_old_records() {
    let temp_dir = TempDir::new().unwrap();
    let options = Options::default().with_retention(Duration::from_secs(3600));
    let db = SensorDb::open(temp_dir.path(), options).unwrap();

    let now = now_nanos();
    let hour = 3_600_000_000_000i64;
    db.insert("s", 1.0, now - 3 * hour).unwrap();
    db.insert("s", 2.0, now - 2 * hour).unwrap();
    db.insert("s", 3.0, now - 1_000).unwrap();

    assert_eq!(db.purge_expired(now).unwrap(), 2);
    let left = collect_records(db.query_range("s", i64::MIN, i64::MAX).unwrap()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].1.value, 3.0);
    assert_eq!(db.purge_expired(now).unwrap(), 0);

    let mut batch = db.new_batch();
    batch.add("s", 4.0, now - 5 * hour).unwrap();
    assert_eq!(db.commit_with_retention(&mut batch).unwrap(), 1);
}

#[test]
fn test_retention_pass_is_bounded() {
    let temp_dir = TempDir::new().unwrap();
    let options = Options::default().with_retention(Duration::from_secs(1));
    let db = SensorDb::open(temp_dir.path(), options).unwrap();
    let mut batch = db.new_batch();
    for i in 0..1_500 {
        batch.add("s", i as f64, i).unwrap();
    }
    db.commit(&mut batch).unwrap();

    let now = 10_000_000_000;
    assert_eq!(db.purge_expired(now).unwrap(), 1_000);
    assert_eq!(db.purge_expired(now).unwrap(), 500);
}

// ============================================================================
// Filter Tests
// ============================================================================

#[test]
fn test_quality_and_metadata_filters() {
    let temp_dir = TempDir::new().unwrap();
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();

    let mut calibrated = Metadata::new();
    calibrated.insert("calibrated".to_string(), "yes".to_string());
    db.insert_with_quality("s", 1.0, Quality::Good, 1, Some(calibrated.clone()))
        .unwrap();
    db.insert_with_quality("s", 2.0, Quality::Suspect, 2, None)
        .unwrap();
    db.insert_with_quality("s", 3.0, Quality::Good, 3, None)
        .unwrap();

    let good = collect_records(
        db.query_with_filters("s", 0, 10, Some(Quality::Good), None)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(good.len(), 2);

    let tagged = collect_records(
        db.query_with_filters("s", 0, 10, None, Some(calibrated))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].0.timestamp, 1);

    let everything =
        collect_records(db.query_with_filters("s", 0, 10, None, None).unwrap()).unwrap();
    assert_eq!(everything.len(), 3);

    let record = db.get("s", 1).unwrap().unwrap();
    assert_eq!(
        record.metadata.unwrap().get("calibrated").map(String::as_str),
        Some("yes")
    );
}

#[test]
fn test_closed_database_rejects_operations() {
    let temp_dir = TempDir::new().unwrap();
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
    db.insert("s", 1.0, 1).unwrap();
    db.close().unwrap();
    assert!(matches!(db.insert("s", 2.0, 2), Err(EdgeError::Closed(_))));
    assert!(db.close().is_ok());
}

// ============================================================================
// Log Growth Tests
// ============================================================================

fn wal_segments(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir.join("wal")).unwrap().count()
}

#[test]
fn test_wal_stays_bounded_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let options = || {
        Options::default()
            .with_retention(Duration::from_secs(1))
            .with_max_wal_segments(3)
    };
    for cycle in 0..8i64 {
        let db = SensorDb::open(temp_dir.path(), options()).unwrap();
        let now = (cycle + 10) * 10_000_000_000;
        db.insert("s", cycle as f64, now).unwrap();
        db.purge_expired(now).unwrap();
        db.close().unwrap();
        assert!(wal_segments(temp_dir.path()) <= 3, "cycle {}", cycle);
    }

    let db = SensorDb::open(temp_dir.path(), options()).unwrap();
    let left = collect_records(db.query_range("s", i64::MIN, i64::MAX).unwrap()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].1.value, 7.0);
}

#[test]
fn test_compact_leaves_one_segment() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
        db.insert("s", 1.0, 1).unwrap();
        db.close().unwrap();
    }
    let db = SensorDb::open(temp_dir.path(), Options::default()).unwrap();
    assert_eq!(wal_segments(temp_dir.path()), 2);
    db.compact().unwrap();
    assert_eq!(wal_segments(temp_dir.path()), 1);
    assert_eq!(db.get("s", 1).unwrap().unwrap().value, 1.0);
}
