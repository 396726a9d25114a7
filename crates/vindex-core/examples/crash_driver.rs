//! Crash recovery test driver binary.
//!
//! This binary runs deterministic operations against a [`Database`] so an
//! external test harness can kill the process mid-run (`kill -9`, or a
//! truncated write simulated by stopping after a fixed operation count) and
//! then check mode what survived.
//!
//! # Usage
//!
//! ```bash
//! # Insert mode
//! cargo run --release --example crash_driver -- \
//!     --mode insert --seed 42 --count 10000 --dimension 128 --data-dir ./crash_test_data
//!
//! # Check mode (integrity validation after recovery)
//! cargo run --release --example crash_driver -- \
//!     --mode check --seed 42 --count 10000 --dimension 128 --data-dir ./crash_test_data
//!
//! # Query mode (verify search still finds what was inserted)
//! cargo run --release --example crash_driver -- \
//!     --mode query --seed 42 --count 10000 --dimension 128 --data-dir ./crash_test_data
//! ```

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use vindex_core::config::{DbConfig, Mode as DbMode};
use vindex_core::db::{Database, ScoreKind, UpsertItem};
use vindex_core::error::Result;

#[derive(Parser, Debug)]
#[command(name = "crash_driver")]
#[command(about = "Deterministic test driver for crash recovery testing")]
struct Args {
    /// Operation mode: insert, query, check, delete, snapshot
    #[arg(long)]
    mode: String,

    /// Random seed for reproducibility
    #[arg(long, default_value = "42")]
    seed: u32,

    /// Number of vectors to operate on
    #[arg(long, default_value = "1000")]
    count: usize,

    /// Vector dimension (must be a positive multiple of 4)
    #[arg(long, default_value = "128")]
    dimension: usize,

    /// Data directory path
    #[arg(long)]
    data_dir: PathBuf,

    /// Snapshot every N upserts (0 disables periodic snapshots)
    #[arg(long, default_value = "100")]
    snapshot_interval: usize,
}

fn main() {
    let args = Args::parse();
    log_reproduction_info(&args);

    let result = match args.mode.as_str() {
        "insert" => run_insert(&args),
        "query" => run_query(&args),
        "check" => run_integrity_check(&args),
        "delete" => run_delete(&args),
        "snapshot" => run_snapshot(&args),
        other => {
            eprintln!("unknown mode: {other}. use: insert, query, check, delete, snapshot");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

fn log_reproduction_info(args: &Args) {
    eprintln!("=== REPRODUCTION INFO ===");
    eprintln!("Mode: {}", args.mode);
    eprintln!("Seed: {}", args.seed);
    eprintln!("Count: {}", args.count);
    eprintln!("Dimension: {}", args.dimension);
    eprintln!("Data dir: {}", args.data_dir.display());
    eprintln!(
        "Command: cargo run --release --example crash_driver -- --mode {} --seed {} --count {} --dimension {} --data-dir {}",
        args.mode, args.seed, args.count, args.dimension, args.data_dir.display()
    );
    eprintln!("=========================");
}

fn open_db(args: &Args) -> Result<Database> {
    let mut config = DbConfig::new(args.dimension, DbMode::Balanced);
    config.seed = args.seed;
    Database::open(&args.data_dir, config)
}

fn vector_for(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn checksum(vector: &[f32]) -> u64 {
    let mut sum: f64 = 0.0;
    for (i, &v) in vector.iter().enumerate() {
        sum += f64::from(v) * (i as f64 + 1.0);
    }
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let checksum = (sum.abs() * 1_000_000.0) as u64;
    checksum
}

fn run_insert(args: &Args) -> Result<()> {
    let mut db = open_db(args)?;
    let mut rng = StdRng::seed_from_u64(args.seed as u64);

    for i in 0..args.count {
        let vector = vector_for(&mut rng, args.dimension);
        let metadata = serde_json::json!({
            "seed": args.seed,
            "checksum": checksum(&vector),
        });
        db.upsert(vec![UpsertItem { external_id: i.to_string(), vector, metadata }])?;

        if args.snapshot_interval > 0 && i > 0 && i % args.snapshot_interval == 0 {
            db.snapshot()?;
            eprintln!("progress: {}/{} (snapshotted)", i, args.count);
        }
    }

    eprintln!("completed: {} vectors inserted", args.count);
    Ok(())
}

fn run_query(args: &Args) -> Result<()> {
    let mut db = open_db(args)?;
    let mut rng = StdRng::seed_from_u64(args.seed as u64);
    let check_count = args.count.min(100);
    let mut successful = 0;

    for i in 0..check_count {
        let vector = vector_for(&mut rng, args.dimension);
        let hits = db.query(&vector, 1, None, ScoreKind::Cosine)?;
        if hits.first().is_some_and(|h| h.external_id == i.to_string()) {
            successful += 1;
        }
    }

    eprintln!("query verification: {successful}/{check_count} successful");
    if successful < check_count * 9 / 10 {
        return Err(vindex_core::error::Error::Io(std::io::Error::other(format!(
            "query verification failed: only {successful}/{check_count} successful"
        ))));
    }
    Ok(())
}

fn run_integrity_check(args: &Args) -> Result<()> {
    eprintln!("opening database for integrity check...");
    let mut db = open_db(args)?;

    let mut rng = StdRng::seed_from_u64(args.seed as u64);
    let check_count = args.count.min(100);
    let mut missing = 0;

    for i in 0..check_count {
        let vector = vector_for(&mut rng, args.dimension);
        let hits = db.query(&vector, 1, None, ScoreKind::Cosine)?;
        if !hits.into_iter().any(|h| h.external_id == i.to_string()) {
            missing += 1;
        }
    }

    eprintln!();
    eprintln!("=== INTEGRITY REPORT ===");
    eprintln!("checked: {check_count}");
    eprintln!("missing: {missing}");
    eprintln!("========================");

    if missing > 0 {
        return Err(vindex_core::error::Error::Io(std::io::Error::other(format!(
            "integrity check failed: {missing}/{check_count} missing"
        ))));
    }
    eprintln!("integrity check PASSED");
    Ok(())
}

fn run_delete(args: &Args) -> Result<()> {
    let mut db = open_db(args)?;
    let ids: Vec<String> = (0..args.count).map(|i| i.to_string()).collect();
    db.delete(&ids)?;
    eprintln!("deleted {} documents", ids.len());
    Ok(())
}

fn run_snapshot(args: &Args) -> Result<()> {
    let mut db = open_db(args)?;
    db.snapshot()?;
    eprintln!("snapshot written");
    Ok(())
}
