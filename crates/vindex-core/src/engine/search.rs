//! Layer search and the top-level query entry point (§4.D).

use super::heap::extract_smallest;
use super::HnswIndex;
use crate::config::MAX_EF;

impl HnswIndex {
    /// Runs a bounded beam search at layer `level` starting from `entry`.
    ///
    /// In build mode (`build_mode = true`), extracts the `target`-sized
    /// (doubled, then clamped to `ef` and to the result set's size) pool of
    /// nearest candidates for neighbor selection instead of the full
    /// ascending result set. Writes up to [`MAX_EF`] `(id, dist)` pairs into
    /// `self.scratch.out_ids`/`out_dists` (§9 "Heaps without allocation" —
    /// the output lives in scratch state instead of a caller-provided
    /// buffer so no call on this path allocates) and returns the count
    /// written.
    pub(super) fn search_layer(
        &mut self,
        q: &[i8],
        entry: i32,
        level: u32,
        ef: u32,
        build_mode: bool,
        target: u32,
    ) -> usize {
        if self.node_offset(entry).is_none() {
            return 0;
        }

        let ef = if ef as usize > MAX_EF {
            self.mark_ef_clamped();
            MAX_EF as u32
        } else {
            ef
        };

        self.visited.next_epoch();
        self.scratch.cand.clear();
        self.scratch.res.clear();

        let d0 = self.distance_to_query(q, entry);
        self.scratch.cand.push(entry, d0);
        self.scratch.res.push(entry, d0);
        self.visited.mark_visited(entry as usize);

        let cand_cap = (ef * 2 + 32).clamp(ef, MAX_EF as u32) as usize;

        while let Some((c, dc)) = self.scratch.cand.pop() {
            if self.scratch.res.len() >= ef as usize {
                let worst = self.scratch.res.peek().map_or(i32::MAX, |(_, d)| d);
                if dc > worst {
                    break;
                }
            }

            let Some(view) = self.node_view(c) else {
                continue;
            };
            let count = view.count(level).min(view.cap(level));
            let slots = view.neighbor_slots(level);

            for &n in slots.iter().take(count as usize) {
                if n < 0 || self.node_offset(n).is_none() {
                    continue;
                }
                let n_idx = n as usize;
                if self.visited.is_visited(n_idx) {
                    continue;
                }
                self.visited.mark_visited(n_idx);

                let d = self.distance_to_query(q, n);
                let res_full = self.scratch.res.len() >= ef as usize;
                let worst = self.scratch.res.peek().map_or(i32::MAX, |(_, d)| d);
                if !res_full || d < worst {
                    if self.scratch.cand.len() < cand_cap {
                        self.scratch.cand.push(n, d);
                    }
                    if !res_full {
                        self.scratch.res.push(n, d);
                    } else if d < worst {
                        self.scratch.res.replace_root(n, d);
                    }
                }
            }
        }

        if !build_mode {
            let mut out_ids = std::mem::take(&mut self.scratch.out_ids);
            let mut out_dists = std::mem::take(&mut self.scratch.out_dists);
            let n = self.scratch.res.drain_sorted_ascending(&mut out_ids, &mut out_dists);
            self.scratch.out_ids = out_ids;
            self.scratch.out_dists = out_dists;
            n
        } else {
            let n = self.scratch.res.len();
            let pool = target.max(target.saturating_mul(2)).min(ef).min(n as u32) as usize;
            let (ids, dists) = self.scratch.res.live_slices();
            let mut out_ids = std::mem::take(&mut self.scratch.out_ids);
            let mut out_dists = std::mem::take(&mut self.scratch.out_dists);
            let used = &mut self.scratch.used_mark[..ids.len().max(1)];
            let written = extract_smallest(ids, dists, used, pool, &mut out_ids, &mut out_dists);
            self.scratch.out_ids = out_ids;
            self.scratch.out_dists = out_dists;
            written
        }
    }

    /// Moves `cursor` greedily at layer `level` toward `q`, following the
    /// single closest neighbor edge until no move improves, starting from
    /// `cursor`'s current distance to `q`.
    pub(super) fn greedy_descend(&self, q: &[i8], mut cursor: i32, level: u32) -> i32 {
        let mut best_dist = self.distance_to_query(q, cursor);
        loop {
            let Some(view) = self.node_view(cursor) else {
                break;
            };
            let count = view.count(level).min(view.cap(level));
            let slots = view.neighbor_slots(level);
            let mut moved = false;
            for &n in slots.iter().take(count as usize) {
                if n < 0 || self.node_offset(n).is_none() {
                    continue;
                }
                let d = self.distance_to_query(q, n);
                if d < best_dist {
                    best_dist = d;
                    cursor = n;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        cursor
    }

    /// Runs a top-level approximate nearest-neighbor query. Writes up to
    /// `min(k, found, results_cap)` `(id, dist)` records, ascending by
    /// distance, into the results buffer and returns the count written.
    pub fn search(&mut self, q: &[i8], k: u32) -> usize {
        if k == 0 || self.entry_point_id < 0 {
            return 0;
        }

        let mut cursor = self.entry_point_id;
        let max_level = self.max_level.max(0) as u32;
        for level in (1..=max_level).rev() {
            cursor = self.greedy_descend(q, cursor, level);
        }

        // Not pre-clamped to MAX_EF here: `search_layer` does its own
        // clamp-and-count so an oversized `ef_search` is observable via
        // `was_ef_clamped()`/the safety counters after a plain query (§7
        // "EFClamped").
        let ef = self.search.ef_search.max(k);
        let found = self.search_layer(q, cursor, 0, ef, false, 0);

        let count = (k as usize).min(found).min(self.search.results_cap as usize);
        if self.results.len() < count * 8 {
            self.results.resize(count * 8, 0);
        }
        for i in 0..count {
            let off = i * 8;
            self.results[off..off + 4].copy_from_slice(&self.scratch.out_ids[i].to_le_bytes());
            self.results[off + 4..off + 8].copy_from_slice(&self.scratch.out_dists[i].to_le_bytes());
        }
        count
    }
}
