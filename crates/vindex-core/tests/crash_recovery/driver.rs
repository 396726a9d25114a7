//! Deterministic operation driver for crash-recovery tests.
//!
//! Drives a [`Database`] through the same insert/flush/delete sequence the
//! `crash_driver` example runs as a standalone binary, but in-process, so
//! these tests can simulate "crash after snapshot, before truncate" and
//! similar midpoints without actually killing a process.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use vindex_core::config::{DbConfig, Mode};
use vindex_core::db::{Database, ScoreKind, UpsertItem};
use vindex_core::error::Result;

#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub data_dir: PathBuf,
    pub seed: u32,
    pub count: usize,
    pub dimension: usize,
    pub snapshot_interval: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./crash_test_data"),
            seed: 42,
            count: 200,
            dimension: 32,
            snapshot_interval: 50,
        }
    }
}

pub struct CrashTestDriver {
    config: DriverConfig,
}

impl CrashTestDriver {
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    fn vector_for(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
        (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn open(&self) -> Result<Database> {
        let mut config = DbConfig::new(self.config.dimension, Mode::Fast);
        config.seed = self.config.seed;
        Database::open(&self.config.data_dir, config)
    }

    /// Inserts `self.config.count` deterministic vectors, snapshotting every
    /// `snapshot_interval` items. Returns the number inserted.
    pub fn run_insert(&self) -> Result<usize> {
        let mut db = self.open()?;
        let mut rng = StdRng::seed_from_u64(self.config.seed as u64);

        for i in 0..self.config.count {
            let vector = Self::vector_for(&mut rng, self.config.dimension);
            db.upsert(vec![UpsertItem {
                external_id: i.to_string(),
                vector,
                metadata: serde_json::json!({"seed": self.config.seed}),
            }])?;

            if self.config.snapshot_interval > 0 && i > 0 && i % self.config.snapshot_interval == 0 {
                db.snapshot()?;
            }
        }
        Ok(self.config.count)
    }

    /// Deletes the first `count` external ids (`"0"..count`).
    pub fn run_delete(&self, count: usize) -> Result<usize> {
        let mut db = self.open()?;
        let ids: Vec<String> = (0..count).map(|i| i.to_string()).collect();
        db.delete(&ids)?;
        Ok(ids.len())
    }

    pub fn snapshot(&self) -> Result<()> {
        self.open()?.snapshot()
    }

    /// Re-derives each inserted vector from the seed and checks that a
    /// nearest-neighbor query against it finds the same external id.
    /// Returns the number of successful round trips.
    pub fn run_query(&self) -> Result<usize> {
        let mut db = self.open()?;
        let mut rng = StdRng::seed_from_u64(self.config.seed as u64);
        let mut successful = 0;

        for i in 0..self.config.count.min(100) {
            let vector = Self::vector_for(&mut rng, self.config.dimension);
            let hits = db.query(&vector, 1, None, ScoreKind::L2)?;
            if hits.first().is_some_and(|h| h.external_id == i.to_string()) {
                successful += 1;
            }
        }
        Ok(successful)
    }
}
