//! Versioned binary dump codec (spec component E).
//!
//! The on-disk layout is a 12-`i32` little-endian header followed by one
//! variable-length record per present node, in ascending internal-id order.
//! `load_index` validates every config field against the runtime config
//! before touching any state, so a mismatched dump never partially mutates
//! the index (§7 `ConfigMismatch`/`CorruptDump`).

use super::HnswIndex;
use crate::error::{Error, Result};
use crate::node::{node_size, NodeView, NodeViewMut};

/// `b"VHNS"` read as a little-endian `u32` (kept as a named magic rather
/// than spelled out at each use site).
const MAGIC: i32 = 0x5753_4E48_u32 as i32;

/// The only dump version this codec accepts (§9 Open Question (a): legacy
/// v1/v2 headers are out of scope).
const VERSION: i32 = 3;

/// Number of `i32` fields in the fixed header.
const HEADER_FIELDS: usize = 12;
const HEADER_SIZE: usize = HEADER_FIELDS * 4;

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_i32(bytes: &[u8], offset: usize) -> Result<i32> {
    let slice = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| Error::CorruptDump(format!("truncated at byte {offset}")))?;
    Ok(i32::from_le_bytes(slice.try_into().unwrap()))
}

impl HnswIndex {
    /// Upper bound on the number of bytes [`HnswIndex::save_index`] will
    /// write, used by hosts to size an output buffer ahead of time.
    #[must_use]
    pub fn get_index_dump_size(&self) -> usize {
        let config = self.config();
        let mut total = HEADER_SIZE;
        for id in 0..self.capacity as i32 {
            let Some(view) = self.node_view(id) else {
                continue;
            };
            total += Self::node_record_size(&view, &config);
        }
        total
    }

    fn node_record_size(view: &NodeView<'_>, config: &crate::config::HnswConfig) -> usize {
        let level = view.level();
        8 + config.dim + (0..=level).map(|l| 4 + view.cap(l) as usize * 4).sum::<usize>()
    }

    /// Serializes the present nodes of the index to a self-describing byte
    /// buffer. Returns the number of bytes written.
    ///
    /// # Errors
    /// Propagates [`Error::ConfigMismatch`] if called before `init_index`.
    pub fn save_index(&self) -> Result<Vec<u8>> {
        let config = self.config();
        let present: Vec<i32> = (0..self.capacity as i32)
            .filter(|&id| self.node_offset(id).is_some())
            .collect();

        let mut out = Vec::with_capacity(HEADER_SIZE + present.len() * 64);
        push_i32(&mut out, MAGIC);
        push_i32(&mut out, VERSION);
        push_i32(&mut out, config.dim as i32);
        push_i32(&mut out, config.m as i32);
        push_i32(&mut out, config.m_max0 as i32);
        push_i32(&mut out, config.ef_construction as i32);
        push_i32(&mut out, config.max_layers as i32);
        push_i32(&mut out, self.capacity as i32);
        push_i32(&mut out, present.len() as i32);
        push_i32(&mut out, self.entry_point_id);
        push_i32(&mut out, self.max_level);
        push_i32(&mut out, self.search.results_cap as i32);

        for id in present {
            let view = self.node_view(id).expect("filtered to present ids");
            push_i32(&mut out, id);
            push_i32(&mut out, view.level() as i32);
            out.extend(self.vector(id).iter().map(|&b| b as u8));
            for l in 0..=view.level() {
                let slots = view.neighbor_slots(l);
                push_i32(&mut out, view.count(l) as i32);
                for slot in slots {
                    push_i32(&mut out, slot);
                }
            }
        }

        Ok(out)
    }

    /// Loads a dump produced by [`HnswIndex::save_index`], validating the
    /// header and every per-node field before mutating any state.
    ///
    /// Reinitializes the index to the dump's `max_elements` on success. On
    /// any validation failure the index is left untouched; returns `false`
    /// (mirroring the language-neutral `{0,1}` surface from §6).
    ///
    /// # Errors
    /// Returns [`Error::ConfigMismatch`] if any frozen config field in the
    /// dump disagrees with the runtime config, or [`Error::CorruptDump`] for
    /// a bad magic/version or any out-of-range field.
    pub fn load_index(&mut self, bytes: &[u8]) -> Result<bool> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::CorruptDump("shorter than the fixed header".into()));
        }
        let config = self.config();

        let magic = read_i32(bytes, 0)?;
        if magic != MAGIC {
            return Err(Error::CorruptDump(format!("bad magic 0x{magic:08X}")));
        }
        let version = read_i32(bytes, 4)?;
        if version != VERSION {
            return Err(Error::CorruptDump(format!("unsupported version {version}")));
        }

        let dim = read_i32(bytes, 8)?;
        let m = read_i32(bytes, 12)?;
        let m_max0 = read_i32(bytes, 16)?;
        let ef_construction = read_i32(bytes, 20)?;
        let max_layers = read_i32(bytes, 24)?;
        let max_elements = read_i32(bytes, 28)?;
        let present_count = read_i32(bytes, 32)?;
        let entry_point_id = read_i32(bytes, 36)?;
        let max_level = read_i32(bytes, 40)?;
        let results_cap = read_i32(bytes, 44)?;

        check_field("dim", dim as usize, config.dim)?;
        check_field("m", m as u32, config.m)?;
        check_field("m_max0", m_max0 as u32, config.m_max0)?;
        check_field("ef_construction", ef_construction as u32, config.ef_construction)?;
        check_field("max_layers", max_layers as u32, config.max_layers)?;

        if max_elements < 0 {
            return Err(Error::CorruptDump("negative max_elements".into()));
        }
        if present_count < 0 || present_count as u32 > max_elements as u32 {
            return Err(Error::CorruptDump("present_count exceeds max_elements".into()));
        }
        if entry_point_id != -1 && (entry_point_id < 0 || entry_point_id as u32 >= max_elements as u32)
        {
            return Err(Error::CorruptDump("entry_point_id out of range".into()));
        }
        if max_level < -1 || (max_level >= 0 && max_level as u32 >= config.max_layers) {
            return Err(Error::CorruptDump("max_level out of range".into()));
        }

        // Parse the body into a scratch list before mutating `self` so a
        // mid-body failure never leaves partial state (§7 CorruptDump).
        struct Parsed {
            id: i32,
            level: u32,
            vector: Vec<i8>,
            layers: Vec<(u32, Vec<i32>)>,
        }

        let mut cursor = HEADER_SIZE;
        let mut nodes = Vec::with_capacity(present_count as usize);
        for _ in 0..present_count {
            let id = read_i32(bytes, cursor)?;
            let level = read_i32(bytes, cursor + 4)?;
            if id < 0 || id as u32 >= max_elements as u32 {
                return Err(Error::CorruptDump("node id out of range".into()));
            }
            if level < 0 || level as u32 >= config.max_layers {
                return Err(Error::CorruptDump("node level out of range".into()));
            }
            cursor += 8;

            let vec_bytes = bytes
                .get(cursor..cursor + config.dim)
                .ok_or_else(|| Error::CorruptDump("truncated vector".into()))?;
            let vector: Vec<i8> = vec_bytes.iter().map(|&b| b as i8).collect();
            cursor += config.dim;

            let mut layers = Vec::with_capacity(level as usize + 1);
            for l in 0..=level as u32 {
                let count = read_i32(bytes, cursor)?;
                cursor += 4;
                let cap = config.layer_cap(l);
                if count < 0 || count as u32 > cap {
                    return Err(Error::CorruptDump("neighbor count exceeds capacity".into()));
                }
                let mut slots = Vec::with_capacity(cap as usize);
                for _ in 0..cap {
                    slots.push(read_i32(bytes, cursor)?);
                    cursor += 4;
                }
                layers.push((count as u32, slots));
            }

            nodes.push(Parsed {
                id,
                level: level as u32,
                vector,
                layers,
            });
        }

        self.init_index(max_elements as u32)?;
        self.entry_point_id = entry_point_id;
        self.max_level = max_level;
        self.search.results_cap = results_cap.max(0) as u32;
        self.results.resize(self.search.results_cap as usize * 8, 0);

        for parsed in &nodes {
            let size = node_size(parsed.level, config.m, config.m_max0);
            let offset = self.arena.alloc(size, None)?;
            {
                let mut view =
                    NodeViewMut::new(&mut self.arena, offset, parsed.level, config.m, config.m_max0);
                view.init(parsed.id, parsed.level);
                for (l, (count, slots)) in parsed.layers.iter().enumerate() {
                    let l = l as u32;
                    let mut written = 0u32;
                    for &slot in slots.iter().take(*count as usize) {
                        let sanitized = if slot >= 0 && (slot as u32) < max_elements as u32 {
                            slot
                        } else {
                            -1
                        };
                        if sanitized != slot {
                            self.counters.record_neighbor_sanitized();
                        }
                        view.set_neighbor(l, written, sanitized);
                        written += 1;
                    }
                    view.set_count(l, *count);
                }
            }
            self.offsets[parsed.id as usize] = offset;
            self.write_vector(parsed.id, &parsed.vector);
            self.element_count += 1;
        }

        if self.entry_point_id >= 0 && self.node_offset(self.entry_point_id).is_none() {
            self.init_index(max_elements as u32)?;
            return Ok(false);
        }

        Ok(true)
    }
}

fn check_field<T: PartialEq + std::fmt::Display>(name: &'static str, dump: T, runtime: T) -> Result<()> {
    if dump != runtime {
        return Err(Error::ConfigMismatch {
            field: name,
            expected: runtime.to_string(),
            actual: dump.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HnswIndex;

    fn build_index(dim: usize, m: u32, ef: u32, capacity: u32) -> HnswIndex {
        let mut idx = HnswIndex::new();
        idx.update_config(dim, m, ef).unwrap();
        idx.init_index(capacity).unwrap();
        idx
    }

    #[test]
    fn round_trip_preserves_search_results() {
        let mut idx = build_index(4, 8, 64, 16);
        idx.seed_rng(7);
        for i in 0..10u32 {
            let v = vec![(i as i8).wrapping_mul(3), 1, 2, 3];
            idx.insert(i, &v).unwrap();
        }
        let q = vec![5i8, 1, 2, 3];
        idx.search(&q, 3);
        let before = idx.results().to_vec();

        let dump = idx.save_index().unwrap();
        let mut reloaded = build_index(4, 8, 64, 16);
        assert!(reloaded.load_index(&dump).unwrap());

        let dump2 = reloaded.save_index().unwrap();
        assert_eq!(dump, dump2);

        reloaded.search(&q, 3);
        assert_eq!(before, reloaded.results());
    }

    #[test]
    fn round_trip_of_empty_index_preserves_sentinels() {
        let idx = build_index(4, 8, 64, 16);
        let dump = idx.save_index().unwrap();

        let mut reloaded = build_index(4, 8, 64, 16);
        assert!(reloaded.load_index(&dump).unwrap());
        assert_eq!(reloaded.get_max_elements(), 16);
        assert!(!reloaded.has_node(0));

        let dump2 = reloaded.save_index().unwrap();
        assert_eq!(dump, dump2);
    }

    #[test]
    fn config_mismatch_on_dim_is_rejected() {
        let mut idx = build_index(4, 8, 64, 4);
        idx.insert(0, &[1, 2, 3, 4]).unwrap();
        let dump = idx.save_index().unwrap();

        let mut reloaded = build_index(8, 8, 64, 4);
        let err = reloaded.load_index(&dump).unwrap_err();
        assert!(matches!(err, Error::ConfigMismatch { field: "dim", .. }));
        assert_eq!(reloaded.get_max_elements(), 4);
        assert!(!reloaded.has_node(0));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let mut idx = build_index(4, 8, 64, 4);
        idx.insert(0, &[1, 2, 3, 4]).unwrap();
        let mut dump = idx.save_index().unwrap();
        dump[0] = !dump[0];

        let mut reloaded = build_index(4, 8, 64, 4);
        assert!(matches!(
            reloaded.load_index(&dump),
            Err(Error::CorruptDump(_))
        ));
    }
}
