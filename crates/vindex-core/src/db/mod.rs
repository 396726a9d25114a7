//! The database orchestration layer (spec component F): binds the HNSW
//! graph engine to a disk-resident float32 vector store, the external↔
//! internal id map, a crash-consistent write pipeline, oplog-based
//! recovery, and compaction.
//!
//! # Module organization
//!
//! - `metadata` — the `MetadataStore` contract and the default
//!   log+snapshot implementation.
//! - `vector_store` — the fixed-capacity memory-mapped f32 file.
//! - `oplog` — the post-snapshot crash-recovery log.
//! - `lock` — per-instance and per-directory FIFO locks.
//!
//! This module itself holds [`Database`], which composes the above with
//! [`crate::engine::HnswIndex`] into the insert/query/snapshot/compaction
//! pipelines from spec.md §4.F.

pub mod lock;
pub mod metadata;
pub mod oplog;
pub mod vector_store;

use crate::config::DbConfig;
use crate::engine::HnswIndex;
use crate::error::{Error, Result};
use crate::quantization::{l2_sq_f32, normalize_l2, quantize_i8};
use lock::{directory_lock, FifoLock};
use metadata::{InMemoryMetadataStore, MetadataEntry, MetadataStore};
use oplog::{OpRecord, Oplog};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vector_store::VectorStoreF32;

const DUMP_FILE_NAME: &str = "dump.bin";
const VECTOR_FILE_NAME: &str = "vectors.f32.bin";

/// One new or updated item for [`Database::upsert`].
pub struct UpsertItem {
    /// Host-chosen external id.
    pub external_id: String,
    /// Already-embedded vector, in the collection's configured dimension.
    /// Embedding raw host input is an external collaborator's job (§1, §6
    /// "Embedder").
    pub vector: Vec<f32>,
    /// Optional JSON payload stored alongside the vector.
    pub metadata: serde_json::Value,
}

/// How to convert a raw squared-L2 distance into a host-facing score
/// (§4.F query pipeline step 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    /// Returns the exact squared L2 distance, unconverted.
    L2,
    /// `clamp(1 - L2²/2, -1, 1)`, valid for unit-normalized vectors.
    Cosine,
    /// `clamp(1 - L2²/4, 0, 1)`, valid for unit-normalized vectors.
    Similarity,
}

impl ScoreKind {
    fn convert(self, l2_sq: f32) -> f32 {
        match self {
            ScoreKind::L2 => l2_sq,
            ScoreKind::Cosine => (1.0 - l2_sq / 2.0).clamp(-1.0, 1.0),
            ScoreKind::Similarity => (1.0 - l2_sq / 4.0).clamp(0.0, 1.0),
        }
    }
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    /// The external id the internal id resolves to.
    pub external_id: String,
    /// The converted score per the requested [`ScoreKind`].
    pub score: f32,
    /// The internal id, exposed for host-side tie-breaking/debugging.
    pub internal_id: u32,
}

/// Binds one HNSW index to one storage directory.
pub struct Database<M: MetadataStore = InMemoryMetadataStore> {
    dir: PathBuf,
    config: DbConfig,
    index: HnswIndex,
    vectors: VectorStoreF32,
    metadata: M,
    oplog: Oplog,
    instance_lock: FifoLock,
    dir_lock: Arc<FifoLock>,
}

impl Database<InMemoryMetadataStore> {
    /// Opens (creating if absent) a database at `dir`, using the default
    /// in-process metadata store.
    ///
    /// # Errors
    /// Propagates I/O, config, or corrupt-dump failures from recovery.
    pub fn open(dir: &Path, config: DbConfig) -> Result<Self> {
        let metadata = InMemoryMetadataStore::open(dir)?;
        Self::open_with_metadata(dir, config, metadata)
    }
}

impl<M: MetadataStore> Database<M> {
    /// Opens a database at `dir` with a caller-supplied [`MetadataStore`]
    /// implementation (§6: the contract is external; this lets a host plug
    /// in its own backend instead of [`InMemoryMetadataStore`]).
    ///
    /// # Errors
    /// Propagates I/O, config, or corrupt-dump failures from recovery.
    pub fn open_with_metadata(dir: &Path, config: DbConfig, metadata: M) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let params = config.mode.resolve();

        let mut index = HnswIndex::new();
        index.update_config(config.dim, params.m, params.ef_construction)?;
        index.init_index(config.capacity)?;
        index.seed_rng(config.seed);
        index.set_results_cap(params.results_cap);
        index.update_search_config(params.base_ef_search);

        let vectors = VectorStoreF32::open(&dir.join(VECTOR_FILE_NAME), config.dim, config.capacity)?;
        let oplog = Oplog::open(dir)?;
        let dir_lock = directory_lock(dir, "default");

        let mut db = Self {
            dir: dir.to_path_buf(),
            config,
            index,
            vectors,
            metadata,
            oplog,
            instance_lock: FifoLock::new(),
            dir_lock,
        };
        db.recover()?;
        Ok(db)
    }

    /// Recovery on open (§4.F "Recovery on open"): load the dump if
    /// present, optionally rebuild from the f32 store if it is absent or
    /// corrupt, then replay the oplog.
    fn recover(&mut self) -> Result<()> {
        let dump_path = self.dir.join(DUMP_FILE_NAME);
        let loaded = if dump_path.exists() {
            let bytes = fs::read(&dump_path)?;
            match self.index.load_index(&bytes) {
                Ok(true) => true,
                Ok(false) | Err(_) => false,
            }
        } else {
            false
        };

        if !loaded && self.config.auto_rebuild_on_load {
            let active = self.metadata.active_entries_by_internal_id();
            if !active.is_empty() {
                self.rebuild_graph_from_store(&active)?;
            }
        }

        for record in self.oplog.read_all()? {
            match record {
                OpRecord::Upsert(id) => {
                    let Some((_, entry)) = self.metadata.get_by_internal_id(id) else {
                        tracing::warn!(id, "oplog replay: no active metadata for id, skipping");
                        continue;
                    };
                    let vector = self.vectors.read(entry.internal_id);
                    let mut normalized = vector;
                    normalize_l2(&mut normalized);
                    let quantized = quantize_i8(&normalized);
                    self.index.insert(id, &quantized)?;
                }
                OpRecord::Delete(_) => {
                    // Soft deletes live entirely in the metadata store,
                    // already replayed by its own log (§3 "Lifecycles").
                }
            }
        }
        tracing::info!(dir = %self.dir.display(), "database opened");
        Ok(())
    }

    fn rebuild_graph_from_store(&mut self, active: &[(String, MetadataEntry)]) -> Result<()> {
        let capacity = self.index.get_max_elements();
        self.index.init_index(capacity)?;
        for (_, entry) in active {
            let mut vector = self.vectors.read(entry.internal_id);
            normalize_l2(&mut vector);
            let quantized = quantize_i8(&vector);
            self.index.insert(entry.internal_id, &quantized)?;
        }
        tracing::info!(count = active.len(), "rebuilt graph from f32 store");
        Ok(())
    }

    /// Runs the insert pipeline (§4.F "Insert pipeline") for a batch of
    /// items: allocates internal ids for new external ids, writes f32
    /// vectors, fsyncs, mutates the graph, appends the oplog, and commits
    /// metadata — rolling the metadata bulk back if any step fails.
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if any vector's length
    /// disagrees with the configured dimension, or [`Error::OutOfCapacity`]
    /// if there is no room for new ids.
    pub fn upsert(&mut self, items: Vec<UpsertItem>) -> Result<()> {
        let _instance_guard = self.instance_lock.lock();
        let _dir_guard = self.dir_lock.lock();

        let dim = self.vectors.dim();
        for item in &items {
            if item.vector.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: item.vector.len(),
                });
            }
        }

        let external_ids: Vec<String> = items.iter().map(|i| i.external_id.clone()).collect();
        let existing = self.metadata.get_many(&external_ids);
        let capacity = self.vectors.capacity();

        // Ids are reserved up front (not rolled back on failure): a gap in
        // the internal-id space is harmless, an internal id claimed by two
        // different external ids is not.
        let new_count = existing.iter().filter(|e| e.is_none()).count() as u32;
        let new_range = if new_count > 0 {
            Some(self.metadata.alloc_internal_ids(new_count, capacity)?)
        } else {
            None
        };

        let mut assigned_ids = Vec::with_capacity(items.len());
        let mut new_cursor = new_range.as_ref().map_or(0, |r| r.start);
        for existing_entry in &existing {
            match existing_entry {
                Some(entry) => assigned_ids.push(entry.internal_id),
                None => {
                    assigned_ids.push(new_cursor);
                    new_cursor += 1;
                }
            }
        }

        // Group new items into one contiguous run (they are, by
        // construction, since `alloc_internal_ids` hands out a contiguous
        // range and we assign them in order); existing items are written
        // individually (§4.F step 4).
        let mut new_run: Vec<Vec<f32>> = Vec::new();
        let run_start = new_range.as_ref().map(|r| r.start);
        for (item, existing_entry) in items.iter().zip(&existing) {
            if existing_entry.is_none() {
                new_run.push(item.vector.clone());
            }
        }
        if let Some(start) = run_start {
            self.vectors.write_run(start, &new_run)?;
        }
        for (item, existing_entry) in items.iter().zip(&existing) {
            if let Some(entry) = existing_entry {
                self.vectors.write(entry.internal_id, &item.vector)?;
            }
        }
        self.vectors.fsync()?;

        for (item, &id) in items.iter().zip(&assigned_ids) {
            let mut normalized = item.vector.clone();
            normalize_l2(&mut normalized);
            let quantized = quantize_i8(&normalized);
            self.index.insert(id, &quantized)?;
        }

        let mut unique_ids = assigned_ids.clone();
        unique_ids.sort_unstable();
        unique_ids.dedup();
        for id in unique_ids {
            self.oplog.append_upsert(id)?;
        }

        // Metadata commits last: if a crash happens before this point, the
        // oplog references ids with no active metadata entry and replay on
        // next open skips them (§4.F "Recovery on open").
        self.metadata.begin_bulk()?;
        let mut add_entries = Vec::new();
        let mut update_entries = Vec::new();
        for ((item, existing_entry), &id) in items.iter().zip(&existing).zip(&assigned_ids) {
            match existing_entry {
                Some(_) => update_entries.push((item.external_id.clone(), item.metadata.clone())),
                None => add_entries.push((item.external_id.clone(), id, item.metadata.clone())),
            }
        }
        let result = (|| -> Result<()> {
            if !add_entries.is_empty() {
                self.metadata.add_many(&add_entries)?;
            }
            for (external_id, metadata) in update_entries {
                self.metadata.update_metadata(&external_id, metadata, false)?;
            }
            Ok(())
        })();
        match &result {
            Ok(()) => self.metadata.end_bulk(true)?,
            Err(_) => self.metadata.end_bulk(false)?,
        }
        result
    }

    /// Soft-deletes a batch of external ids (§4.F "Delete").
    ///
    /// # Errors
    /// Propagates metadata or oplog I/O failures.
    pub fn delete(&mut self, external_ids: &[String]) -> Result<()> {
        let _instance_guard = self.instance_lock.lock();
        let _dir_guard = self.dir_lock.lock();

        let existing = self.metadata.get_many(external_ids);
        self.metadata.begin_bulk()?;
        let result = (|| -> Result<()> {
            self.metadata.mark_deleted_many(external_ids)?;
            for entry in existing.into_iter().flatten() {
                self.oplog.append_delete(entry.internal_id)?;
            }
            Ok(())
        })();
        match &result {
            Ok(()) => self.metadata.end_bulk(true)?,
            Err(_) => self.metadata.end_bulk(false)?,
        }
        result?;

        let total = self.metadata.total_count().max(1) as f32;
        let ratio = self.metadata.deleted_count() as f32 / total;
        if ratio > self.config.deleted_rebuild_threshold {
            tracing::info!(ratio, "deleted ratio exceeds threshold, rebuild recommended");
        }
        Ok(())
    }

    /// Runs the query pipeline (§4.F "Query pipeline"): ANN search,
    /// metadata filtering, exact f32 re-rank, and score conversion.
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if `query.len()` disagrees with
    /// the configured dimension.
    pub fn query(
        &mut self,
        query: &[f32],
        k: usize,
        filter: Option<&dyn Fn(&serde_json::Value) -> bool>,
        score_kind: ScoreKind,
    ) -> Result<Vec<QueryHit>> {
        let _instance_guard = self.instance_lock.lock();

        let dim = self.vectors.dim();
        if query.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
        }

        let params = self.config.mode.resolve();
        let k = k.max(1) as u32;
        let ef_search = params.base_ef_search.max(k * 2);
        self.index.update_search_config(ef_search);

        let ann_k = k
            .max(k.saturating_mul(params.rerank_multiplier))
            .min(params.max_ann_k)
            .min(self.index.get_max_ef());
        self.index.set_results_cap(ann_k);

        let mut normalized = query.to_vec();
        normalize_l2(&mut normalized);
        let quantized = quantize_i8(&normalized);

        let found = self.index.search(&quantized, ann_k);
        let candidates = self.index.results_pairs(found);

        let allowed: Option<roaring::RoaringBitmap> =
            filter.map(|f| self.metadata.filter_internal_id_set(f));

        let mut scored: Vec<(u32, String, f32)> = Vec::with_capacity(candidates.len());
        for &(id, _) in &candidates {
            let id = id as u32;
            if let Some(allowed) = &allowed {
                if !allowed.contains(id) {
                    continue;
                }
            }
            let Some((external_id, _)) = self.metadata.get_by_internal_id(id) else {
                continue;
            };
            let vector = self.vectors.read(id);
            let exact = l2_sq_f32(&normalized, &vector);
            scored.push((id, external_id, exact));
        }

        scored.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k as usize);

        Ok(scored
            .into_iter()
            .map(|(internal_id, external_id, l2_sq)| QueryHit {
                external_id,
                score: score_kind.convert(l2_sq),
                internal_id,
            })
            .collect())
    }

    /// Serializes the graph to a temp file, fsyncs, atomically renames it
    /// to `dump.bin`, and truncates the oplog (§4.F "Snapshot").
    ///
    /// # Errors
    /// Propagates I/O or serialization failures. The oplog is left intact
    /// if any step before the rename fails.
    pub fn snapshot(&mut self) -> Result<()> {
        let _instance_guard = self.instance_lock.lock();
        let _dir_guard = self.dir_lock.lock();

        let bytes = self.index.save_index()?;
        let tmp_path = self.dir.join(format!("{DUMP_FILE_NAME}.tmp"));
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            std::io::Write::write_all(&mut tmp, &bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.dir.join(DUMP_FILE_NAME))?;

        self.metadata.save_now()?;
        self.oplog.truncate()?;
        tracing::info!(bytes = bytes.len(), "snapshot written");
        Ok(())
    }

    /// Full compaction rebuild (§4.F "Compaction rebuild"): renumbers
    /// active items to a dense `[0, active_count)` id space, rewrites the
    /// f32 store, and reinitializes the graph.
    ///
    /// # Errors
    /// Propagates I/O or graph-engine failures mid-rebuild.
    pub fn compact(&mut self) -> Result<()> {
        let _instance_guard = self.instance_lock.lock();
        let _dir_guard = self.dir_lock.lock();

        let active = self.metadata.active_entries_by_internal_id();
        // Round up to the next power of two so a handful of post-compaction
        // inserts don't immediately force another rebuild.
        let new_capacity = (active.len() as u32).max(1).next_power_of_two();

        let new_vector_path = self.dir.join(format!("{VECTOR_FILE_NAME}.compact"));
        let mut new_vectors = VectorStoreF32::open(&new_vector_path, self.vectors.dim(), new_capacity)?;

        let mut reassigned: Vec<(String, u32, serde_json::Value, Vec<f32>)> = Vec::new();
        for (new_id, (external_id, entry)) in active.iter().enumerate() {
            let vector = self.vectors.read(entry.internal_id);
            new_vectors.write(new_id as u32, &vector)?;
            reassigned.push((external_id.clone(), new_id as u32, entry.metadata.clone(), vector));
        }
        new_vectors.fsync()?;

        let final_vector_path = self.dir.join(VECTOR_FILE_NAME);
        fs::rename(&new_vector_path, &final_vector_path)?;
        self.vectors = VectorStoreF32::open(&final_vector_path, self.vectors.dim(), new_capacity)?;

        self.index.init_index(new_capacity)?;
        for (_, new_id, _, vector) in &reassigned {
            let mut normalized = vector.clone();
            normalize_l2(&mut normalized);
            let quantized = quantize_i8(&normalized);
            self.index.insert(*new_id, &quantized)?;
        }

        self.metadata.begin_bulk()?;
        let remap: Vec<(String, u32, serde_json::Value)> =
            reassigned.into_iter().map(|(id, new_id, md, _)| (id, new_id, md)).collect();
        self.metadata.add_many(&remap)?;
        self.metadata.end_bulk(true)?;
        self.metadata.purge_deleted();

        self.oplog.truncate()?;
        tracing::info!(new_capacity, "compaction rebuild complete");
        Ok(())
    }

    /// The storage directory this instance is bound to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read-only access to the underlying graph engine (diagnostics, tests).
    #[must_use]
    pub fn index(&self) -> &HnswIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use tempfile::tempdir;

    fn item(id: &str, v: Vec<f32>) -> UpsertItem {
        UpsertItem { external_id: id.to_string(), vector: v, metadata: serde_json::json!({}) }
    }

    fn open_db(dir: &Path) -> Database {
        let mut config = DbConfig::new(4, Mode::Fast);
        config.capacity = 64;
        Database::open(dir, config).unwrap()
    }

    #[test]
    fn one_hot_ranking() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());
        db.upsert(vec![
            item("e0", vec![1.0, 0.0, 0.0, 0.0]),
            item("e1", vec![0.0, 1.0, 0.0, 0.0]),
            item("e2", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .unwrap();

        let hits = db.query(&[1.0, 0.0, 0.0, 0.0], 1, None, ScoreKind::L2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "e0");

        let hits = db.query(&[0.5, 0.5, 0.0, 0.0], 2, None, ScoreKind::L2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].external_id, "e0");
        assert_eq!(hits[1].external_id, "e1");
    }

    #[test]
    fn delete_excludes_from_query() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());
        db.upsert(vec![item("a", vec![1.0, 0.0, 0.0, 0.0]), item("b", vec![0.9, 0.1, 0.0, 0.0])])
            .unwrap();
        db.delete(&["a".to_string()]).unwrap();

        let hits = db.query(&[1.0, 0.0, 0.0, 0.0], 2, None, ScoreKind::L2).unwrap();
        assert!(hits.iter().all(|h| h.external_id != "a"));
    }

    #[test]
    fn snapshot_and_reopen_preserves_search() {
        let dir = tempdir().unwrap();
        {
            let mut db = open_db(dir.path());
            db.upsert(vec![item("a", vec![1.0, 0.0, 0.0, 0.0]), item("b", vec![0.0, 1.0, 0.0, 0.0])])
                .unwrap();
            db.snapshot().unwrap();
        }
        let mut reopened = open_db(dir.path());
        let hits = reopened.query(&[1.0, 0.0, 0.0, 0.0], 1, None, ScoreKind::L2).unwrap();
        assert_eq!(hits[0].external_id, "a");
    }

    #[test]
    fn oplog_replay_after_snapshot_recovers_new_items() {
        let dir = tempdir().unwrap();
        {
            let mut db = open_db(dir.path());
            db.upsert(vec![item("a", vec![1.0, 0.0, 0.0, 0.0])]).unwrap();
            db.snapshot().unwrap();
            db.upsert(vec![item("b", vec![0.0, 1.0, 0.0, 0.0])]).unwrap();
            // No snapshot: `b` lives only in the oplog.
        }
        let mut reopened = open_db(dir.path());
        let hits = reopened.query(&[0.0, 1.0, 0.0, 0.0], 1, None, ScoreKind::L2).unwrap();
        assert_eq!(hits[0].external_id, "b");
    }

    #[test]
    fn metadata_filter_excludes_nonmatching() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());
        db.upsert(vec![
            UpsertItem {
                external_id: "a".into(),
                vector: vec![1.0, 0.0, 0.0, 0.0],
                metadata: serde_json::json!({"tier": "gold"}),
            },
            UpsertItem {
                external_id: "b".into(),
                vector: vec![0.9, 0.1, 0.0, 0.0],
                metadata: serde_json::json!({"tier": "silver"}),
            },
        ])
        .unwrap();

        let filter = |md: &serde_json::Value| md.get("tier").and_then(|t| t.as_str()) == Some("gold");
        let hits = db.query(&[1.0, 0.0, 0.0, 0.0], 2, Some(&filter), ScoreKind::L2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "a");
    }

    #[test]
    fn compaction_renumbers_and_preserves_search() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());
        db.upsert(vec![item("a", vec![1.0, 0.0, 0.0, 0.0]), item("b", vec![0.0, 1.0, 0.0, 0.0])])
            .unwrap();
        db.delete(&["a".to_string()]).unwrap();
        db.compact().unwrap();

        let hits = db.query(&[0.0, 1.0, 0.0, 0.0], 1, None, ScoreKind::L2).unwrap();
        assert_eq!(hits[0].external_id, "b");
    }

    #[test]
    fn score_kinds_stay_in_bounds() {
        assert!((-1.0..=1.0).contains(&ScoreKind::Cosine.convert(0.0)));
        assert!((-1.0..=1.0).contains(&ScoreKind::Cosine.convert(10.0)));
        assert!((0.0..=1.0).contains(&ScoreKind::Similarity.convert(0.0)));
        assert!((0.0..=1.0).contains(&ScoreKind::Similarity.convert(10.0)));
    }
}
