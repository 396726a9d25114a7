//! The HNSW graph core (spec component D): node storage, neighbor
//! maintenance, layer search, insert/update, and query, all operating on a
//! single [`HnswIndex`] instance with no internal locking (§5).
//!
//! # Module organization
//!
//! - `rng` — seedable xorshift32 used for random level assignment.
//! - `heap` — fixed-capacity candidate/result heaps.
//! - `visited` — the per-id visited-stamp array.
//! - `neighbors` — heuristic neighbor selection and bidirectional edge
//!   maintenance (`add_connection`/`remove_connection`/`overwrite_neighbors`).
//! - `search` — `search_layer`, greedy descent, and the top-level `search`.
//! - `insert` — `insert` and `update_and_reconnect`.
//! - `persistence` — the versioned binary dump codec.
//! - `safety_counters` — always-on diagnostic counters.

mod heap;
mod insert;
mod neighbors;
pub mod persistence;
mod rng;
pub mod safety_counters;
mod search;
mod visited;

use crate::arena::Arena;
use crate::config::{HnswConfig, SearchConfig, MAX_EF};
use crate::error::{Error, Result};
use crate::node::{NodeView, NodeViewMut};
use heap::{DistHeap, HeapOrder};
use rng::Xorshift32;
use safety_counters::SafetyCounters;
use visited::VisitedStamps;

/// Sentinel stored in `entry_point_id`/`max_level` when the graph is empty.
const SENTINEL: i32 = -1;

/// Reusable scratch state for one in-flight graph call (§9 "Heaps without
/// allocation"). Every field here is sized once, at `init_index` time, and
/// reused by every subsequent call.
struct Scratch {
    cand: DistHeap,
    res: DistHeap,
    /// Byte scratch for [`heap::extract_smallest`]'s used-mark selection.
    used_mark: Vec<u8>,
    /// `search_layer`'s output arrays, reused across calls so the query hot
    /// path (`search`) never allocates.
    out_ids: Vec<i32>,
    out_dists: Vec<i32>,
}

impl Scratch {
    fn new() -> Self {
        Self {
            cand: DistHeap::new(HeapOrder::Min),
            res: DistHeap::new(HeapOrder::Max),
            used_mark: vec![0; MAX_EF],
            out_ids: vec![0; MAX_EF],
            out_dists: vec![0; MAX_EF],
        }
    }
}

/// The HNSW graph engine.
///
/// One instance owns one arena, one offsets table, one vector store, and
/// one set of scratch buffers (§9 "Process-wide state" — there is no
/// implicit singleton; the orchestrator may hold several instances keyed by
/// storage directory).
pub struct HnswIndex {
    config: Option<HnswConfig>,
    search: SearchConfig,

    arena: Arena,
    offsets: Vec<usize>,
    vectors: Vec<i8>,

    entry_point_id: i32,
    max_level: i32,
    element_count: u32,
    capacity: u32,

    visited: VisitedStamps,
    rng: Xorshift32,
    scratch: Scratch,
    results: Vec<u8>,

    ef_clamped: bool,
    counters: SafetyCounters,
}

impl HnswIndex {
    /// Builds an uninitialized engine. Call [`HnswIndex::update_config`]
    /// then [`HnswIndex::init_index`] before inserting or querying.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            search: SearchConfig::default(),
            arena: Arena::new(),
            offsets: Vec::new(),
            vectors: Vec::new(),
            entry_point_id: SENTINEL,
            max_level: SENTINEL,
            element_count: 0,
            capacity: 0,
            visited: VisitedStamps::new(0),
            rng: Xorshift32::default(),
            scratch: Scratch::new(),
            results: Vec::new(),
            ef_clamped: false,
            counters: SafetyCounters::new(),
        }
    }

    // ---------------------------------------------------------------
    // Configuration & state (spec component G)
    // ---------------------------------------------------------------

    /// Sets the frozen construction hyperparameters.
    ///
    /// Permitted only before the first [`HnswIndex::init_index`], or
    /// idempotently with identical values afterward; any other attempt to
    /// change `dim`, `m`, or `ef_construction` post-init is rejected
    /// (spec.md §4.G calls this "fatal" — callers that treat
    /// [`Error::ConfigMismatch`] as non-recoverable get that behavior for
    /// free by propagating it rather than swallowing it).
    pub fn update_config(&mut self, dim: usize, m: u32, ef_construction: u32) -> Result<()> {
        let candidate = HnswConfig::new(dim, m, ef_construction)?;
        match &self.config {
            None => {
                self.config = Some(candidate);
                Ok(())
            }
            Some(current) => current.assert_compatible(&candidate),
        }
    }

    /// Always permitted; non-positive values are ignored (§4.G).
    pub fn update_search_config(&mut self, ef_search: u32) {
        self.search.set_ef_search(ef_search);
    }

    /// Reseeds the level-assignment RNG.
    pub fn seed_rng(&mut self, seed: u32) {
        self.rng.reseed(seed);
    }

    /// Sets the results-buffer capacity (in `(id, dist)` records).
    pub fn set_results_cap(&mut self, n: u32) {
        self.search.results_cap = n;
        self.results.resize(n as usize * 8, 0);
    }

    /// The current results-buffer capacity.
    #[must_use]
    pub fn get_results_cap(&self) -> u32 {
        self.search.results_cap
    }

    /// The compile-time upper bound on any `ef` value.
    #[must_use]
    pub fn get_max_ef(&self) -> u32 {
        MAX_EF as u32
    }

    /// The configured internal-id capacity.
    #[must_use]
    pub fn get_max_elements(&self) -> u32 {
        self.capacity
    }

    /// Whether an `ef` value was clamped to `MAX_EF` since the last
    /// [`HnswIndex::clear_ef_clamped`].
    #[must_use]
    pub fn was_ef_clamped(&self) -> bool {
        self.ef_clamped
    }

    /// Clears the EF-clamp diagnostic flag.
    pub fn clear_ef_clamped(&mut self) {
        self.ef_clamped = false;
    }

    fn mark_ef_clamped(&mut self) {
        self.ef_clamped = true;
        self.counters.record_ef_clamped();
    }

    /// Read-only access to the always-on diagnostic counters.
    #[must_use]
    pub fn counters(&self) -> SafetyCounters {
        self.counters
    }

    // ---------------------------------------------------------------
    // Index lifecycle
    // ---------------------------------------------------------------

    /// (Re-)initializes the index at `capacity`. `dim`/`m`/`ef_construction`
    /// must already be set via [`HnswIndex::update_config`].
    pub fn init_index(&mut self, capacity: u32) -> Result<()> {
        let config = self.config.ok_or_else(|| Error::ConfigMismatch {
            field: "dim",
            expected: "set via update_config before init_index".to_string(),
            actual: "unset".to_string(),
        })?;

        self.arena.reset();
        // Offset 0 is the "no node" sentinel in the offsets table; burn the
        // first 16 bytes so no real node ever lands there.
        self.arena.alloc(16, None)?;

        self.offsets = vec![0usize; capacity as usize];
        self.vectors = vec![0i8; capacity as usize * config.dim];
        self.entry_point_id = SENTINEL;
        self.max_level = SENTINEL;
        self.element_count = 0;
        self.capacity = capacity;
        self.visited = VisitedStamps::new(capacity as usize);
        self.results
            .resize(self.search.results_cap as usize * 8, 0);
        self.ef_clamped = false;
        Ok(())
    }

    /// Whether `id` currently has a node.
    #[must_use]
    pub fn has_node(&self, id: u32) -> bool {
        (id as usize) < self.offsets.len() && self.offsets[id as usize] != 0
    }

    fn config(&self) -> HnswConfig {
        self.config.expect("init_index sets config before any graph op runs")
    }

    fn node_offset(&self, id: i32) -> Option<usize> {
        if id < 0 || id as usize >= self.offsets.len() {
            return None;
        }
        let off = self.offsets[id as usize];
        (off != 0).then_some(off)
    }

    fn node_view(&self, id: i32) -> Option<NodeView<'_>> {
        let off = self.node_offset(id)?;
        let (_, level) = NodeView::header(&self.arena, off);
        let config = self.config();
        Some(NodeView::new(&self.arena, off, level, config.m, config.m_max0))
    }

    fn node_view_mut(&mut self, id: i32) -> Option<NodeViewMut<'_>> {
        let off = self.node_offset(id)?;
        let (_, level) = NodeView::header(&self.arena, off);
        let config = self.config();
        Some(NodeViewMut::new(&mut self.arena, off, level, config.m, config.m_max0))
    }

    fn vector(&self, id: i32) -> &[i8] {
        let dim = self.config().dim;
        let start = id as usize * dim;
        &self.vectors[start..start + dim]
    }

    fn distance(&self, a: i32, b: i32) -> i32 {
        crate::distance::l2_sq_i8(self.vector(a), self.vector(b))
    }

    fn distance_to_query(&self, q: &[i8], id: i32) -> i32 {
        crate::distance::l2_sq_i8(q, self.vector(id))
    }

    /// Copies `vector` into the vector store slot for `id` without
    /// touching the graph (used by insert and update alike).
    fn write_vector(&mut self, id: i32, vector: &[i8]) {
        let dim = self.config().dim;
        let start = id as usize * dim;
        self.vectors[start..start + dim].copy_from_slice(vector);
    }

    /// Overwrites the stored vector without reconnecting the graph.
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if `vector.len() != dim`, or a
    /// no-op (matching §4.D "Failure semantics") if `id` is absent.
    pub fn update_vector(&mut self, id: u32, vector: &[i8]) -> Result<()> {
        let dim = self.config().dim;
        if vector.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        if self.has_node(id as i32 as u32) {
            self.write_vector(id as i32, vector);
        }
        Ok(())
    }

    /// The `(id, dist)` records written by the last [`HnswIndex::search`]
    /// call, as 8-byte little-endian records (`id: i32`, `dist: i32`).
    #[must_use]
    pub fn results(&self) -> &[u8] {
        &self.results
    }

    /// The `(id, dist)` pairs from the last [`HnswIndex::search`] call.
    #[must_use]
    pub fn results_pairs(&self, count: usize) -> Vec<(i32, i32)> {
        self.results[..count * 8]
            .chunks_exact(8)
            .map(|rec| {
                let id = i32::from_le_bytes(rec[0..4].try_into().unwrap());
                let dist = i32::from_le_bytes(rec[4..8].try_into().unwrap());
                (id, dist)
            })
            .collect()
    }

    // ---------------------------------------------------------------
    // Memory (spec §6 "Memory")
    // ---------------------------------------------------------------

    /// Resets the arena to empty without forgetting the frozen config.
    pub fn init_memory(&mut self) {
        self.arena.reset();
    }

    /// Bump-allocates `size` bytes from the shared arena.
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        self.arena.alloc(size, None)
    }

    /// Current arena cursor position.
    #[must_use]
    pub fn get_memory_usage(&self) -> usize {
        self.arena.usage()
    }

    /// Restores the arena cursor to a previously captured position.
    pub fn set_memory_usage(&mut self, pos: usize) {
        self.arena.set_usage(pos);
    }

    /// Rewinds the arena to empty and reseeds the RNG (§9 "RNG").
    pub fn reset_memory(&mut self) {
        self.arena.reset();
        self.rng = Xorshift32::default();
    }
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_changes_after_init_are_rejected_but_idempotent_values_pass() {
        let mut idx = HnswIndex::new();
        idx.update_config(8, 16, 64).unwrap();
        idx.init_index(4).unwrap();

        assert!(idx.update_config(8, 16, 64).is_ok());

        let err = idx.update_config(16, 16, 64).unwrap_err();
        assert!(matches!(err, Error::ConfigMismatch { field: "dim", .. }));

        let err = idx.update_config(8, 32, 64).unwrap_err();
        assert!(matches!(err, Error::ConfigMismatch { field: "m", .. }));

        let err = idx.update_config(8, 16, 128).unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigMismatch { field: "ef_construction", .. }
        ));
    }

    #[test]
    fn ef_search_changes_are_always_accepted_and_observable() {
        let mut idx = HnswIndex::new();
        idx.update_config(8, 16, 64).unwrap();
        idx.init_index(4).unwrap();

        idx.update_search_config(200);
        assert_eq!(idx.search.ef_search, 200);

        // Non-positive values are ignored rather than rejected (§4.G).
        idx.update_search_config(0);
        assert_eq!(idx.search.ef_search, 200);
    }
}
