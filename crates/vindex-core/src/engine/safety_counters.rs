//! Always-on diagnostic counters for the graph engine (§9 "Process-wide
//! state"; SPEC_FULL §E.5).
//!
//! Unlike the teacher's lock-contention counters (the engine here has no
//! internal locking — §5 makes it single-threaded), these track the
//! diagnostics spec.md calls out explicitly: EF clamping and the neighbor-
//! slot sanitization `load_index` performs on corrupt dumps. Plain
//! counters are enough because nothing inside the engine runs concurrently
//! with itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyCounters {
    /// Times `ef` was clamped down to `MAX_EF` during a search or build.
    pub ef_clamped_total: u64,
    /// Neighbor slots rewritten to `-1` by `load_index` because they were
    /// out of range or referred to an absent node.
    pub neighbor_slot_sanitized_total: u64,
}

impl SafetyCounters {
    /// A fresh, all-zero counter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ef_clamped_total: 0,
            neighbor_slot_sanitized_total: 0,
        }
    }

    /// Records an EF clamp event.
    #[inline]
    pub fn record_ef_clamped(&mut self) {
        self.ef_clamped_total += 1;
    }

    /// Records a neighbor-slot sanitization during dump load.
    #[inline]
    pub fn record_neighbor_sanitized(&mut self) {
        self.neighbor_slot_sanitized_total += 1;
    }
}
