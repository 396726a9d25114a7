//! Node insertion and in-place update-with-reconnect (§4.D).

use super::HnswIndex;
use crate::error::{Error, Result};
use crate::node::{node_size, NodeViewMut};

impl HnswIndex {
    /// Inserts `vector` at `id`, building its graph connections. If `id`
    /// already has a node, delegates to [`HnswIndex::update_and_reconnect`].
    ///
    /// # Errors
    /// Returns [`Error::OutOfCapacity`] if `id` is beyond the configured
    /// capacity, or [`Error::DimensionMismatch`] if `vector.len()` disagrees
    /// with the frozen dimension.
    pub fn insert(&mut self, id: u32, vector: &[i8]) -> Result<()> {
        let config = self.config();
        if vector.len() != config.dim {
            return Err(Error::DimensionMismatch {
                expected: config.dim,
                actual: vector.len(),
            });
        }
        if id >= self.capacity {
            return Err(Error::OutOfCapacity {
                requested: id,
                capacity: self.capacity,
            });
        }

        if self.has_node(id) {
            return self.update_and_reconnect(id, vector);
        }

        let id = id as i32;
        self.write_vector(id, vector);

        let level = self.rng.random_level(config.max_layers);
        let size = node_size(level, config.m, config.m_max0);
        let offset = self.arena.alloc(size, None)?;
        {
            let mut view = NodeViewMut::new(&mut self.arena, offset, level, config.m, config.m_max0);
            view.init(id, level);
        }
        self.offsets[id as usize] = offset;

        if self.entry_point_id < 0 {
            self.entry_point_id = id;
            self.max_level = level as i32;
            self.element_count += 1;
            return Ok(());
        }

        let vector = self.vector(id).to_vec();
        let mut cursor = self.entry_point_id;
        let max_level = self.max_level.max(0) as u32;
        for l in (level + 1..=max_level).rev() {
            cursor = self.greedy_descend(&vector, cursor, l);
        }

        let start_level = level.min(max_level);
        for l in (0..=start_level).rev() {
            let cap = config.layer_cap(l);
            let ef = config.ef_construction;
            let found = self.search_layer(&vector, cursor, l, ef, true, cap);
            let picked =
                self.select_neighbors_heuristic(&vector, &self.scratch.out_ids[..found], cap as usize);
            for &n in &picked {
                self.add_connection(id, n, l);
                self.add_connection(n, id, l);
            }
            if let Some(&best) = picked.first() {
                cursor = best;
            }
        }

        if level as i32 > self.max_level {
            self.max_level = level as i32;
            self.entry_point_id = id;
        }
        self.element_count += 1;
        Ok(())
    }

    /// Overwrites `id`'s stored vector and rebuilds its graph connections
    /// layer by layer, purging stale reverse edges that no longer apply.
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if `vector.len()` disagrees with
    /// the frozen dimension. A no-op (`Ok(())`) if `id` has no node.
    pub fn update_and_reconnect(&mut self, id: u32, vector: &[i8]) -> Result<()> {
        let config = self.config();
        if vector.len() != config.dim {
            return Err(Error::DimensionMismatch {
                expected: config.dim,
                actual: vector.len(),
            });
        }
        if !self.has_node(id) {
            return Ok(());
        }
        let id = id as i32;
        self.write_vector(id, vector);

        let level = self
            .node_view(id)
            .map(|v| v.level())
            .unwrap_or(0)
            .min(config.max_layers.saturating_sub(1));

        let vector = self.vector(id).to_vec();
        let mut cursor = self.entry_point_id;
        let max_level = self.max_level.max(0) as u32;
        for l in (level + 1..=max_level).rev() {
            cursor = self.greedy_descend(&vector, cursor, l);
        }

        let start_level = level.min(max_level);
        for l in (0..=start_level).rev() {
            let cap = config.layer_cap(l);
            let old = self
                .node_view(id)
                .map(|v| v.neighbors(l))
                .unwrap_or_default();

            let ef = config.ef_construction;
            let found = self.search_layer(&vector, cursor, l, ef, true, cap);
            let picked =
                self.select_neighbors_heuristic(&vector, &self.scratch.out_ids[..found], cap as usize);

            for &o in &old {
                if o != id && o >= 0 && !picked.contains(&o) {
                    self.remove_connection(o, id, l);
                }
            }
            self.overwrite_neighbors(id, l, &picked);
            for &n in &picked {
                if n != id && n >= 0 {
                    self.add_connection(n, id, l);
                }
            }

            if let Some(&best) = picked.first() {
                cursor = best;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_EF;

    fn build_index(capacity: u32) -> HnswIndex {
        let mut idx = HnswIndex::new();
        idx.update_config(4, 8, 32).unwrap();
        idx.init_index(capacity).unwrap();
        idx
    }

    #[test]
    fn capacity_overflow_leaves_graph_and_count_unchanged() {
        let mut idx = build_index(2);
        idx.insert(0, &[1, 2, 3, 4]).unwrap();
        idx.insert(1, &[4, 3, 2, 1]).unwrap();

        let before = idx.element_count;
        let err = idx.insert(2, &[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfCapacity { requested: 2, capacity: 2 }
        ));
        assert_eq!(idx.element_count, before);
        assert!(!idx.has_node(2));
    }

    #[test]
    fn update_then_reconnect_keeps_both_ids_searchable() {
        let mut idx = build_index(8);
        let e0 = vec![127i8, 0, 0, 0];
        let e1 = vec![0i8, 127, 0, 0];
        idx.insert(0, &e0).unwrap();
        idx.insert(1, &e1).unwrap();

        idx.update_and_reconnect(1, &e0).unwrap();

        let found = idx.search(&e0, 2);
        let pairs = idx.results_pairs(found);
        let ids: Vec<i32> = pairs.iter().map(|&(id, _)| id).collect();
        assert!(ids.contains(&0));
        assert!(ids.contains(&1));

        // id 1 now holds the same vector as id 0, so its layer-0 neighbor
        // list no longer needs to contain id 0 at a worse distance than
        // before the heuristic re-ran; at minimum it must stay within cap.
        let view = idx.node_view(1).unwrap();
        assert!(view.count(0) <= view.cap(0));
    }

    #[test]
    fn ef_exceeding_max_ef_is_clamped_and_search_stays_well_formed() {
        let mut idx = build_index(16);
        for id in 0..10u32 {
            idx.insert(id, &[(id as i8) * 3, 1, 2, 3]).unwrap();
        }
        idx.clear_ef_clamped();
        idx.update_search_config(MAX_EF as u32 * 4);

        let found = idx.search(&[5, 1, 2, 3], 3);
        assert_eq!(found, 3);
        assert!(idx.was_ef_clamped());
        assert_eq!(idx.counters().ef_clamped_total, 1);

        let pairs = idx.results_pairs(found);
        for w in pairs.windows(2) {
            assert!(w[0].1 <= w[1].1, "results not sorted ascending by distance");
        }
    }
}
