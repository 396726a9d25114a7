//! Diversity-aware neighbor selection and bidirectional edge maintenance
//! (§4.D).

use super::HnswIndex;

impl HnswIndex {
    /// Picks up to `target` neighbors from `found` (already sorted ascending
    /// by distance to `q`), preferring candidates closer to `q` than to any
    /// already-accepted pick (the classical diversity-preserving "RNG"
    /// test). Pads from the remaining candidates, in order, skipping
    /// duplicates, if fewer than `target` pass the test.
    pub(super) fn select_neighbors_heuristic(
        &self,
        q: &[i8],
        found: &[i32],
        target: usize,
    ) -> Vec<i32> {
        let mut picked: Vec<i32> = Vec::with_capacity(target);
        let mut leftover: Vec<i32> = Vec::new();

        for &c in found {
            if picked.len() >= target {
                leftover.push(c);
                continue;
            }
            let d_cq = self.distance_to_query(q, c);
            let accept = picked.iter().all(|&s| self.distance(c, s) >= d_cq);
            if accept {
                picked.push(c);
            } else {
                leftover.push(c);
            }
        }

        if picked.len() < target {
            for c in leftover {
                if picked.len() >= target {
                    break;
                }
                if !picked.contains(&c) {
                    picked.push(c);
                }
            }
        }
        picked
    }

    /// Adds a directed edge `src -> dst` at layer `L`, evicting the worst
    /// existing neighbor and mirroring the removal if the new edge is
    /// better and the slot table is full.
    pub(super) fn add_connection(&mut self, src: i32, dst: i32, level: u32) {
        let Some(view) = self.node_view(src) else {
            return;
        };
        let cap = view.cap(level);
        let count = view.count(level).min(cap);
        let slots = view.neighbor_slots(level);
        if slots[..count as usize].contains(&dst) {
            return;
        }

        if count < cap {
            let idx = count;
            let mut view_mut = self.node_view_mut(src).expect("checked above");
            view_mut.set_neighbor(level, idx, dst);
            view_mut.set_count(level, count + 1);
            return;
        }

        let new_dist = self.distance(src, dst);
        let mut worst_idx = 0u32;
        let mut worst_dist = i32::MIN;
        for (idx, &slot) in slots.iter().enumerate() {
            let d = if slot < 0 || self.node_offset(slot).is_none() {
                i32::MAX
            } else {
                self.distance(src, slot)
            };
            if d > worst_dist {
                worst_dist = d;
                worst_idx = idx as u32;
            }
        }

        if new_dist < worst_dist {
            let victim = slots[worst_idx as usize];
            let mut view_mut = self.node_view_mut(src).expect("checked above");
            view_mut.set_neighbor(level, worst_idx, dst);
            if victim >= 0 {
                self.remove_connection(victim, src, level);
            }
        }
    }

    /// Removes the directed edge `src -> dst` at layer `L`, compacting the
    /// slot table by swapping in the last active slot.
    pub(super) fn remove_connection(&mut self, src: i32, dst: i32, level: u32) {
        let Some(view) = self.node_view(src) else {
            return;
        };
        let count = view.count(level).min(view.cap(level));
        if count == 0 {
            return;
        }
        let slots = view.neighbor_slots(level);
        let Some(pos) = slots[..count as usize].iter().position(|&n| n == dst) else {
            return;
        };
        let last = count - 1;
        let mut view_mut = self.node_view_mut(src).expect("checked above");
        let last_val = view_mut.neighbor(level, last);
        view_mut.set_neighbor(level, pos as u32, last_val);
        view_mut.set_neighbor(level, last, -1);
        view_mut.set_count(level, last);
    }

    /// Overwrites layer `L`'s neighbor list for `id` with `picked`,
    /// deduplicating, dropping self-references and out-of-range ids, and
    /// padding the remainder with `-1`.
    pub(super) fn overwrite_neighbors(&mut self, id: i32, level: u32, picked: &[i32]) {
        let Some(mut view) = self.node_view_mut(id) else {
            return;
        };
        let cap = view.cap(level);
        let mut written = 0u32;
        for &n in picked {
            if written >= cap || n == id || n < 0 {
                continue;
            }
            let already = (0..written).any(|i| view.neighbor(level, i) == n);
            if already {
                continue;
            }
            view.set_neighbor(level, written, n);
            written += 1;
        }
        for i in written..cap {
            view.set_neighbor(level, i, -1);
        }
        view.set_count(level, written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build_index(capacity: u32) -> HnswIndex {
        let mut idx = HnswIndex::new();
        idx.update_config(8, 6, 48).unwrap();
        idx.init_index(capacity).unwrap();
        idx.seed_rng(11);
        idx
    }

    fn vector_for(id: u32) -> Vec<i8> {
        (0..8).map(|d| ((id as i32 * 7 + d as i32 * 3) % 127) as i8).collect()
    }

    /// Walks every present node's every layer and checks that every stored
    /// edge has a live reverse edge, that counts never exceed caps, and
    /// that no layer holds a duplicate neighbor id (spec.md §8 "Bidirectional
    /// edges" and "Neighbor uniqueness and bounds").
    fn assert_graph_invariants(idx: &HnswIndex) {
        for id in 0..idx.capacity as i32 {
            let Some(u) = idx.node_view(id) else { continue };
            for l in 0..=u.level() {
                let count = u.count(l);
                assert!(count <= u.cap(l), "count({l}) exceeds cap({l}) for node {id}");

                let neighbors = u.neighbors(l);
                let mut seen = std::collections::HashSet::new();
                for &v in &neighbors {
                    assert!(seen.insert(v), "duplicate neighbor {v} of {id} at layer {l}");
                    assert!(v >= 0 && (v as usize) < idx.offsets.len(), "{v} out of range");
                    let Some(v_view) = idx.node_view(v) else {
                        panic!("node {id}'s neighbor {v} at layer {l} is absent");
                    };
                    assert!(
                        v_view.neighbors(l).contains(&id),
                        "edge {id}->{v} at layer {l} has no reverse edge"
                    );
                }
            }
        }
    }

    #[test]
    fn insert_then_update_preserves_graph_invariants() {
        let mut idx = build_index(32);
        for id in 0..20u32 {
            idx.insert(id, &vector_for(id)).unwrap();
        }
        assert_graph_invariants(&idx);

        for id in (0..20u32).step_by(3) {
            idx.update_and_reconnect(id, &vector_for(id + 1)).unwrap();
        }
        assert_graph_invariants(&idx);
    }

    proptest! {
        #[test]
        fn arbitrary_insert_update_sequences_keep_graph_consistent(
            ops in prop::collection::vec((0u32..16, any::<bool>()), 1..60)
        ) {
            let mut idx = build_index(16);
            for (id, is_update) in ops {
                let vector = vector_for(id);
                if is_update && idx.has_node(id) {
                    idx.update_and_reconnect(id, &vector).unwrap();
                } else {
                    idx.insert(id, &vector).unwrap();
                }
            }
            assert_graph_invariants(&idx);
        }
    }
}
