//! Crash-recovery test harness.
//!
//! `driver` replays the same deterministic insert/snapshot/delete sequence
//! the `crash_driver` example runs as a standalone binary, so these tests
//! can reopen a directory mid-sequence and check what the recovery path
//! (dump load, rebuild-from-store, oplog replay) actually reconstructed.

mod driver;

pub use driver::{CrashTestDriver, DriverConfig};
