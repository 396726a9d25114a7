//! Per-node byte layout inside the arena (spec component C).
//!
//! A node record is a variable-length run of bytes: an 8-byte header
//! (`id: i32`, `level: i32`) followed by one layer block per level the node
//! occupies. Layer `L`'s block is `count: i32` followed by `cap(L)` i32
//! neighbor slots (`-1` marks an unused slot). [`NodeView`] and
//! [`NodeViewMut`] compute the byte offsets so the rest of the engine never
//! does pointer arithmetic directly.

use crate::arena::Arena;

/// Header size in bytes: `id: i32` + `level: i32`.
const HEADER_SIZE: usize = 8;

/// Byte size of one layer block's `count` field.
const COUNT_SIZE: usize = 4;

/// `cap(L)`: `m_max0` at layer 0, `m` above it.
#[inline]
#[must_use]
pub fn layer_cap(level: u32, m: u32, m_max0: u32) -> u32 {
    if level == 0 {
        m_max0
    } else {
        m
    }
}

/// Byte size of layer `L`'s block (count + its neighbor slots).
#[inline]
fn block_size(level: u32, m: u32, m_max0: u32) -> usize {
    COUNT_SIZE + layer_cap(level, m, m_max0) as usize * 4
}

/// `node_size(level) = 8 + (4 + M_MAX0·4) + level·(4 + M·4)` (§4.C).
#[inline]
#[must_use]
pub fn node_size(level: u32, m: u32, m_max0: u32) -> usize {
    HEADER_SIZE + block_size(0, m, m_max0) + level as usize * block_size(1, m, m_max0)
}

/// Byte offset of layer `L`'s block, relative to the start of the node
/// record (i.e. including the 8-byte header skip).
#[inline]
fn layer_block_offset(level: u32, m: u32, m_max0: u32) -> usize {
    if level == 0 {
        HEADER_SIZE
    } else {
        HEADER_SIZE + block_size(0, m, m_max0) + (level as usize - 1) * block_size(1, m, m_max0)
    }
}

#[inline]
fn read_i32_le(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

#[inline]
fn write_i32_le(bytes: &mut [u8], offset: usize, value: i32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view over a node record already written into the arena.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    bytes: &'a [u8],
    m: u32,
    m_max0: u32,
}

impl<'a> NodeView<'a> {
    /// Builds a view over the node at `offset`, given its already-known
    /// `level` (read from the offsets-table lookup's accompanying record or
    /// from [`NodeView::level`] on a header-only slice).
    #[must_use]
    pub fn new(arena: &'a Arena, offset: usize, level: u32, m: u32, m_max0: u32) -> Self {
        let size = node_size(level, m, m_max0);
        Self {
            bytes: arena.slice(offset, size),
            m,
            m_max0,
        }
    }

    /// Reads just the header (id, level) without knowing the level ahead of
    /// time; callers use this to discover `level` before building a full
    /// [`NodeView`].
    #[must_use]
    pub fn header(arena: &'a Arena, offset: usize) -> (i32, u32) {
        let bytes = arena.slice(offset, HEADER_SIZE);
        let id = read_i32_le(bytes, 0);
        let level = read_i32_le(bytes, 4);
        (id, level.max(0) as u32)
    }

    /// The node's internal id.
    #[must_use]
    pub fn id(&self) -> i32 {
        read_i32_le(self.bytes, 0)
    }

    /// The highest layer this node occupies.
    #[must_use]
    pub fn level(&self) -> u32 {
        read_i32_le(self.bytes, 4).max(0) as u32
    }

    /// Number of live neighbors stored at layer `L`.
    #[must_use]
    pub fn count(&self, level: u32) -> u32 {
        let off = layer_block_offset(level, self.m, self.m_max0);
        read_i32_le(self.bytes, off).max(0) as u32
    }

    /// The full neighbor-slot capacity at layer `L` (including unused `-1`
    /// padding beyond `count(L)`).
    #[must_use]
    pub fn cap(&self, level: u32) -> u32 {
        layer_cap(level, self.m, self.m_max0)
    }

    /// All neighbor slots at layer `L`, including `-1` padding past `count`.
    #[must_use]
    pub fn neighbor_slots(&self, level: u32) -> Vec<i32> {
        let off = layer_block_offset(level, self.m, self.m_max0) + COUNT_SIZE;
        let cap = self.cap(level) as usize;
        (0..cap)
            .map(|i| read_i32_le(self.bytes, off + i * 4))
            .collect()
    }

    /// The live (non-padding) neighbor ids at layer `L`.
    #[must_use]
    pub fn neighbors(&self, level: u32) -> Vec<i32> {
        let count = self.count(level) as usize;
        let mut slots = self.neighbor_slots(level);
        slots.truncate(count);
        slots
    }
}

/// Mutable view over a node record, for in-place edits to counts and slots.
pub struct NodeViewMut<'a> {
    bytes: &'a mut [u8],
    m: u32,
    m_max0: u32,
}

impl<'a> NodeViewMut<'a> {
    /// Builds a mutable view over the node at `offset` given its `level`.
    #[must_use]
    pub fn new(arena: &'a mut Arena, offset: usize, level: u32, m: u32, m_max0: u32) -> Self {
        let size = node_size(level, m, m_max0);
        Self {
            bytes: arena.slice_mut(offset, size),
            m,
            m_max0,
        }
    }

    /// Initializes a freshly allocated node record: writes `id`/`level` and
    /// zeroes every layer's `count` and neighbor slots to `-1`.
    pub fn init(&mut self, id: i32, level: u32) {
        write_i32_le(self.bytes, 0, id);
        write_i32_le(self.bytes, 4, level as i32);
        for l in 0..=level {
            let off = layer_block_offset(l, self.m, self.m_max0);
            write_i32_le(self.bytes, off, 0);
            let cap = layer_cap(l, self.m, self.m_max0) as usize;
            for i in 0..cap {
                write_i32_le(self.bytes, off + COUNT_SIZE + i * 4, -1);
            }
        }
    }

    /// Number of live neighbors at layer `L`.
    #[must_use]
    pub fn count(&self, level: u32) -> u32 {
        let off = layer_block_offset(level, self.m, self.m_max0);
        read_i32_le(self.bytes, off).max(0) as u32
    }

    /// Overwrites layer `L`'s `count` field directly. Callers are
    /// responsible for keeping slots consistent with the new count.
    pub fn set_count(&mut self, level: u32, count: u32) {
        let off = layer_block_offset(level, self.m, self.m_max0);
        write_i32_le(self.bytes, off, count as i32);
    }

    /// The full neighbor-slot capacity at layer `L`.
    #[must_use]
    pub fn cap(&self, level: u32) -> u32 {
        layer_cap(level, self.m, self.m_max0)
    }

    /// Reads neighbor slot `idx` at layer `L` (may be `-1`).
    #[must_use]
    pub fn neighbor(&self, level: u32, idx: u32) -> i32 {
        let off = layer_block_offset(level, self.m, self.m_max0) + COUNT_SIZE + idx as usize * 4;
        read_i32_le(self.bytes, off)
    }

    /// Writes `value` into neighbor slot `idx` at layer `L`.
    pub fn set_neighbor(&mut self, level: u32, idx: u32, value: i32) {
        let off = layer_block_offset(level, self.m, self.m_max0) + COUNT_SIZE + idx as usize * 4;
        write_i32_le(self.bytes, off, value);
    }

    /// All neighbor slots at layer `L`, including `-1` padding past count.
    #[must_use]
    pub fn neighbor_slots(&self, level: u32) -> Vec<i32> {
        let cap = self.cap(level);
        (0..cap).map(|i| self.neighbor(level, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_size_matches_formula() {
        let m = 16;
        let m_max0 = 32;
        assert_eq!(node_size(0, m, m_max0), 8 + (4 + m_max0 as usize * 4));
        assert_eq!(
            node_size(2, m, m_max0),
            8 + (4 + m_max0 as usize * 4) + 2 * (4 + m as usize * 4)
        );
    }

    #[test]
    fn init_then_read_round_trips() {
        let m = 8;
        let m_max0 = 16;
        let level = 2;
        let mut arena = Arena::new();
        let size = node_size(level, m, m_max0);
        let offset = arena.alloc(size, None).unwrap();

        {
            let mut view = NodeViewMut::new(&mut arena, offset, level, m, m_max0);
            view.init(42, level);
            view.set_count(0, 1);
            view.set_neighbor(0, 0, 7);
        }

        let view = NodeView::new(&arena, offset, level, m, m_max0);
        assert_eq!(view.id(), 42);
        assert_eq!(view.level(), level);
        assert_eq!(view.neighbors(0), vec![7]);
        assert_eq!(view.count(1), 0);
        assert!(view.neighbor_slots(1).iter().all(|&s| s == -1));
    }
}
