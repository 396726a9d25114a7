//! FIFO locking (§4.F "Concurrency", §5 "Ordering guarantees").
//!
//! Two layers: a per-[`crate::db::Database`] instance lock, and a
//! process-wide lock keyed by storage directory so that two `Database`
//! instances opened against the same directory (e.g. from two threads)
//! still serialize in submission order. Both are ticket locks over
//! `parking_lot` primitives rather than a plain `Mutex`, because a plain
//! mutex does not guarantee FIFO wakeup order under contention.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// A strictly FIFO mutual-exclusion lock: waiters are served in the order
/// they called [`FifoLock::lock`].
pub struct FifoLock {
    state: Mutex<TicketState>,
    cond: Condvar,
}

struct TicketState {
    next_ticket: u64,
    now_serving: u64,
}

impl FifoLock {
    /// Builds an unlocked, fresh ticket lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TicketState { next_ticket: 0, now_serving: 0 }),
            cond: Condvar::new(),
        }
    }

    /// Blocks until it is this caller's turn, in call order, and returns a
    /// guard that releases the lock (advancing to the next ticket) on drop.
    #[must_use]
    pub fn lock(&self) -> FifoLockGuard<'_> {
        let my_ticket = {
            let mut state = self.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            ticket
        };

        let mut state = self.state.lock();
        while state.now_serving != my_ticket {
            self.cond.wait(&mut state);
        }
        drop(state);

        FifoLockGuard { lock: self }
    }
}

impl Default for FifoLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard released by [`FifoLock::lock`].
pub struct FifoLockGuard<'a> {
    lock: &'a FifoLock,
}

impl Drop for FifoLockGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.now_serving += 1;
        self.lock.cond.notify_all();
    }
}

/// Process-wide registry of [`FifoLock`]s keyed by canonicalized storage
/// directory, so every `Database` instance sharing a directory (and
/// prefix) contends on the same lock (§4.F "across instances sharing the
/// same storage directory via a process-wide FIFO lock keyed by the
/// directory+prefix").
static REGISTRY: OnceLock<Mutex<FxHashMap<String, Arc<FifoLock>>>> = OnceLock::new();

/// Returns (creating if absent) the process-wide lock for `dir` + `prefix`.
#[must_use]
pub fn directory_lock(dir: &std::path::Path, prefix: &str) -> Arc<FifoLock> {
    let key = format!("{}\u{0}{}", canonical_key(dir), prefix);
    let registry = REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()));
    let mut map = registry.lock();
    map.entry(key).or_insert_with(|| Arc::new(FifoLock::new())).clone()
}

fn canonical_key(dir: &std::path::Path) -> String {
    dir.canonicalize()
        .unwrap_or_else(|_| PathBuf::from(dir))
        .to_string_lossy()
        .into_owned()
}
