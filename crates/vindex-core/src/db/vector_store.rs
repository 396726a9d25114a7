//! The disk-resident float32 vector file (§3 "Vector store (f32)", §6
//! "f32 vector file").
//!
//! A fixed-size, memory-mapped file of `capacity * dim * 4` bytes, addressed
//! directly by `id * dim * 4` — no index-file indirection, since ids are
//! dense and the size is known up front (unlike the teacher's general
//! `MmapStorage`, which supports growth and a variable-width row index).

use crate::error::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Fixed-capacity memory-mapped float32 vector file.
pub struct VectorStoreF32 {
    path: PathBuf,
    dim: usize,
    capacity: u32,
    file: std::fs::File,
    mmap: MmapMut,
}

impl VectorStoreF32 {
    /// Opens (creating and zero-filling if absent) the f32 store at `path`
    /// sized for `capacity` vectors of `dim` components each.
    ///
    /// # Errors
    /// Propagates I/O failures growing or mapping the file.
    pub fn open(path: &Path, dim: usize, capacity: u32) -> Result<Self> {
        let byte_len = capacity as u64 * dim as u64 * 4;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() < byte_len {
            file.set_len(byte_len)?;
        }
        // SAFETY: the backing file is exclusively owned by this `Database`
        // instance per the per-directory lock (§5 "Shared-resource policy").
        let mmap = unsafe { MmapOptions::new().len(byte_len as usize).map_mut(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            dim,
            capacity,
            file,
            mmap,
        })
    }

    fn byte_range(&self, id: u32) -> Range<usize> {
        let start = id as usize * self.dim * 4;
        start..start + self.dim * 4
    }

    /// Reads the stored vector for `id`.
    #[must_use]
    pub fn read(&self, id: u32) -> Vec<f32> {
        let range = self.byte_range(id);
        self.mmap[range]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().unwrap()))
            .collect()
    }

    /// Writes `vector` to `id`'s slot.
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if `vector.len() != dim`.
    pub fn write(&mut self, id: u32, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let range = self.byte_range(id);
        for (chunk, v) in self.mmap[range].chunks_exact_mut(4).zip(vector) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    /// Writes a contiguous run of vectors starting at `start_id` in one
    /// pass (§4.F insert pipeline step 4 "one write per run").
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if any vector's length disagrees.
    pub fn write_run(&mut self, start_id: u32, vectors: &[Vec<f32>]) -> Result<()> {
        for (offset, vector) in vectors.iter().enumerate() {
            self.write(start_id + offset as u32, vector)?;
        }
        Ok(())
    }

    /// Reads a contiguous run of `count` vectors starting at `start_id`.
    #[must_use]
    pub fn read_run(&self, start_id: u32, count: u32) -> Vec<Vec<f32>> {
        (0..count).map(|i| self.read(start_id + i)).collect()
    }

    /// Flushes the mapping to disk (§4.F insert pipeline step 5, §5 "Crash
    /// consistency").
    ///
    /// # Errors
    /// Propagates the underlying `msync` failure.
    pub fn fsync(&self) -> Result<()> {
        self.mmap.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Configured capacity, in vectors.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Configured dimensionality.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.f32.bin");
        let mut store = VectorStoreF32::open(&path, 4, 8).unwrap();
        store.write(3, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(store.read(3), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.read(0), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn contiguous_run_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.f32.bin");
        let mut store = VectorStoreF32::open(&path, 2, 8).unwrap();
        let run = vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        store.write_run(2, &run).unwrap();
        assert_eq!(store.read_run(2, 3), run);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.f32.bin");
        let mut store = VectorStoreF32::open(&path, 4, 4).unwrap();
        assert!(matches!(
            store.write(0, &[1.0, 2.0]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn reopening_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.f32.bin");
        {
            let mut store = VectorStoreF32::open(&path, 4, 4).unwrap();
            store.write(1, &[5.0, 6.0, 7.0, 8.0]).unwrap();
            store.fsync().unwrap();
        }
        let reopened = VectorStoreF32::open(&path, 4, 4).unwrap();
        assert_eq!(reopened.read(1), vec![5.0, 6.0, 7.0, 8.0]);
    }
}
