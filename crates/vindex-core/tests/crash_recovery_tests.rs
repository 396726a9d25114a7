//! Crash recovery integration tests.
//!
//! These open a directory mid-sequence (after a snapshot, or after inserts
//! with no snapshot at all) and check that reopening reconstructs a
//! searchable, logically consistent database.

mod crash_recovery;

use crash_recovery::{CrashTestDriver, DriverConfig};
use tempfile::tempdir;
use vindex_core::config::{DbConfig, Mode};
use vindex_core::db::Database;

#[test]
fn reopen_after_snapshot_recovers_everything() {
    let temp = tempdir().unwrap();
    let config = DriverConfig {
        data_dir: temp.path().to_path_buf(),
        seed: 42,
        count: 200,
        dimension: 32,
        snapshot_interval: 50,
    };

    let driver = CrashTestDriver::new(config.clone());
    let inserted = driver.run_insert().unwrap();
    assert_eq!(inserted, 200);
    driver.snapshot().unwrap();

    let successful = driver.run_query().unwrap();
    assert!(successful >= 90, "expected at least 90/100 round trips, got {successful}");
}

#[test]
fn reopen_with_no_snapshot_replays_oplog() {
    let temp = tempdir().unwrap();
    let config = DriverConfig {
        data_dir: temp.path().to_path_buf(),
        seed: 7,
        count: 80,
        dimension: 16,
        // 0 disables periodic snapshots: every insert lives only in the
        // oplog until the driver's own process exits without ever snapshotting.
        snapshot_interval: 0,
    };

    let driver = CrashTestDriver::new(config.clone());
    driver.run_insert().unwrap();

    // Reopening (a fresh `Database::open`) must replay the oplog and find
    // everything, since nothing was ever snapshotted.
    let successful = driver.run_query().unwrap();
    assert!(successful >= 70, "expected at least 70/80 round trips, got {successful}");
}

#[test]
fn mixed_insert_delete_stays_consistent_across_reopen() {
    let temp = tempdir().unwrap();
    let config = DriverConfig {
        data_dir: temp.path().to_path_buf(),
        seed: 11,
        count: 100,
        dimension: 16,
        snapshot_interval: 25,
    };

    let driver = CrashTestDriver::new(config.clone());
    driver.run_insert().unwrap();
    driver.run_delete(40).unwrap();
    driver.snapshot().unwrap();

    // Reopen and confirm the deleted ids never come back and the
    // database opens without error (no corruption from the interleaving).
    let mut db = {
        let mut cfg = DbConfig::new(config.dimension, Mode::Fast);
        cfg.seed = config.seed;
        Database::open(&config.data_dir, cfg).unwrap()
    };
    let hits = db.query(&vec![0.0; config.dimension], 100, None, vindex_core::ScoreKind::L2).unwrap();
    for hit in &hits {
        let id: usize = hit.external_id.parse().unwrap();
        assert!(id >= 40, "deleted id {id} resurfaced after reopen");
    }
}
