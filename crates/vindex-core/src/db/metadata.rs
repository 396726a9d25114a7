//! The metadata store contract (§6 "Metadata store") and a default
//! in-process implementation (SPEC_FULL §E.2).
//!
//! spec.md treats the metadata store as an external collaborator: a keyed
//! map from external string id to `{internal_id, metadata, deleted}` with
//! transactional bulk semantics. [`MetadataStore`] is that contract;
//! [`InMemoryMetadataStore`] is one concrete, exercisable implementation
//! (append-only log + periodic snapshot, mirroring the shape of a
//! write-ahead log: in-memory index, durable log, atomic snapshot rename).

use crate::error::{Error, Result};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One row of the metadata map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataEntry {
    /// The dense internal id this external id currently resolves to.
    pub internal_id: u32,
    /// Host-supplied JSON payload.
    pub metadata: serde_json::Value,
    /// Soft-delete flag; excluded from queries without graph removal (§3
    /// "Lifecycles").
    pub deleted: bool,
}

/// The required contract external metadata systems must expose (§6).
pub trait MetadataStore {
    /// Looks up existing entries for a batch of external ids, in the
    /// requested order (`None` where absent).
    fn get_many(&self, ids: &[String]) -> Vec<Option<MetadataEntry>>;

    /// Adds new entries, resolving each external id via `existing_map`
    /// when it already has an assigned internal id (idempotent upsert of
    /// the same external id), otherwise inserting fresh.
    ///
    /// # Errors
    /// Returns an error if called outside a bulk transaction.
    fn add_many(
        &mut self,
        entries: &[(String, u32, serde_json::Value)],
    ) -> Result<()>;

    /// Merges (or replaces) the metadata payload for one external id.
    ///
    /// # Errors
    /// Returns an error if `id` is unknown.
    fn update_metadata(&mut self, id: &str, metadata: serde_json::Value, merge: bool) -> Result<()>;

    /// Soft-deletes a batch of external ids; absent ids are ignored.
    fn mark_deleted_many(&mut self, ids: &[String]) -> Result<()>;

    /// Looks up the entry currently mapped to `internal_id`, if any and
    /// not soft-deleted.
    fn get_by_internal_id(&self, internal_id: u32) -> Option<(String, MetadataEntry)>;

    /// Translates a structural filter predicate into the set of internal
    /// ids whose (non-deleted) metadata satisfies it, as an allowed-id
    /// bitmap (§4.F query pipeline step 5 "a structural filter translated
    /// to an allowed-id set").
    fn filter_internal_id_set(&self, predicate: &dyn Fn(&serde_json::Value) -> bool) -> RoaringBitmap;

    /// Reserves `n` fresh, contiguous internal ids.
    ///
    /// # Errors
    /// Returns [`Error::OutOfCapacity`] if the reservation would exceed
    /// `capacity`.
    fn alloc_internal_ids(&mut self, n: u32, capacity: u32) -> Result<std::ops::Range<u32>>;

    /// Opens a bulk transaction. Nested calls are rejected.
    ///
    /// # Errors
    /// Returns an error if a bulk transaction is already open.
    fn begin_bulk(&mut self) -> Result<()>;

    /// Closes the bulk transaction, committing or rolling back every
    /// mutation recorded since `begin_bulk` (§4.F step 8, §7 recovery
    /// policy).
    ///
    /// # Errors
    /// Returns an error if no bulk transaction is open.
    fn end_bulk(&mut self, commit: bool) -> Result<()>;

    /// Forces a durable write of the current state (snapshot + log
    /// truncation), independent of the oplog/dump cadence the graph engine
    /// uses.
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    fn save_now(&mut self) -> Result<()>;

    /// Total entries, including soft-deleted ones.
    fn total_count(&self) -> u32;

    /// Soft-deleted entry count since the store was opened or last
    /// compacted.
    fn deleted_count(&self) -> u32;

    /// The highest internal id ever handed out (`None` if none yet).
    fn max_allocated_internal_id(&self) -> Option<u32>;

    /// All non-deleted external ids, sorted by internal id ascending
    /// (used by compaction to reassign dense ids).
    fn active_entries_by_internal_id(&self) -> Vec<(String, MetadataEntry)>;

    /// Drops every soft-deleted entry and resets the deleted-since-rebuild
    /// counter to zero (called by compaction, which already rewrote the
    /// active set under a fresh dense id space).
    fn purge_deleted(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
enum LogOp {
    Add { external_id: String, internal_id: u32, metadata: serde_json::Value },
    Update { external_id: String, metadata: serde_json::Value, merge: bool },
    Delete { external_id: String },
}

/// A default, file-backed [`MetadataStore`]: an in-memory `BTreeMap` kept
/// durable by an append-only log of [`LogOp`] records plus a periodic full
/// JSON snapshot. `save_now` replaces the snapshot atomically and truncates
/// the log, the same crash-consistency shape the graph engine's own
/// dump+oplog pair uses (§5 "Crash consistency").
pub struct InMemoryMetadataStore {
    path: PathBuf,
    entries: BTreeMap<String, MetadataEntry>,
    next_internal_id: u32,
    deleted_since_rebuild: u32,
    log_file: File,
    bulk_depth: u32,
    bulk_undo: Vec<UndoOp>,
}

enum UndoOp {
    RemoveAdded(String),
    Restore(String, MetadataEntry),
}

impl InMemoryMetadataStore {
    const SNAPSHOT_NAME: &'static str = "metadata.snapshot.json";
    const LOG_NAME: &'static str = "metadata.log";

    /// Opens (creating if absent) a metadata store rooted at `dir`,
    /// replaying the snapshot and any log records written since.
    ///
    /// # Errors
    /// Propagates I/O and (de)serialization failures.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let snapshot_path = dir.join(Self::SNAPSHOT_NAME);
        let log_path = dir.join(Self::LOG_NAME);

        let mut entries: BTreeMap<String, MetadataEntry> = if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path)?;
            serde_json::from_slice(&bytes).map_err(|e| Error::CorruptDump(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        if log_path.exists() {
            let reader = BufReader::new(File::open(&log_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let op: LogOp = serde_json::from_str(&line)
                    .map_err(|e| Error::CorruptDump(e.to_string()))?;
                apply_op(&mut entries, op);
            }
        }

        let next_internal_id = entries
            .values()
            .map(|e| e.internal_id + 1)
            .max()
            .unwrap_or(0);

        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        Ok(Self {
            path: dir.to_path_buf(),
            entries,
            next_internal_id,
            deleted_since_rebuild: 0,
            log_file,
            bulk_depth: 0,
            bulk_undo: Vec::new(),
        })
    }

    fn append_log(&mut self, op: &LogOp) -> Result<()> {
        let line = serde_json::to_string(op).map_err(|e| Error::CorruptDump(e.to_string()))?;
        writeln!(self.log_file, "{line}")?;
        self.log_file.sync_data()?;
        Ok(())
    }

    fn require_bulk(&self) -> Result<()> {
        if self.bulk_depth == 0 {
            return Err(Error::CorruptDump(
                "metadata mutation attempted outside begin_bulk/end_bulk".into(),
            ));
        }
        Ok(())
    }
}

fn apply_op(entries: &mut BTreeMap<String, MetadataEntry>, op: LogOp) {
    match op {
        LogOp::Add { external_id, internal_id, metadata } => {
            entries.insert(
                external_id,
                MetadataEntry { internal_id, metadata, deleted: false },
            );
        }
        LogOp::Update { external_id, metadata, merge } => {
            if let Some(entry) = entries.get_mut(&external_id) {
                entry.metadata = if merge {
                    merge_json(&entry.metadata, &metadata)
                } else {
                    metadata
                };
            }
        }
        LogOp::Delete { external_id } => {
            if let Some(entry) = entries.get_mut(&external_id) {
                entry.deleted = true;
            }
        }
    }
}

fn merge_json(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in overlay_map {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get_many(&self, ids: &[String]) -> Vec<Option<MetadataEntry>> {
        ids.iter().map(|id| self.entries.get(id).cloned()).collect()
    }

    fn add_many(&mut self, entries: &[(String, u32, serde_json::Value)]) -> Result<()> {
        self.require_bulk()?;
        for (external_id, internal_id, metadata) in entries {
            let op = LogOp::Add {
                external_id: external_id.clone(),
                internal_id: *internal_id,
                metadata: metadata.clone(),
            };
            let undo = match self.entries.get(external_id) {
                Some(prev) => UndoOp::Restore(external_id.clone(), prev.clone()),
                None => UndoOp::RemoveAdded(external_id.clone()),
            };
            self.bulk_undo.push(undo);
            apply_op(&mut self.entries, op.clone());
            self.append_log(&op)?;
        }
        Ok(())
    }

    fn update_metadata(&mut self, id: &str, metadata: serde_json::Value, merge: bool) -> Result<()> {
        self.require_bulk()?;
        let Some(prev) = self.entries.get(id).cloned() else {
            return Err(Error::CorruptDump(format!("unknown external id `{id}`")));
        };
        self.bulk_undo.push(UndoOp::Restore(id.to_string(), prev));
        let op = LogOp::Update { external_id: id.to_string(), metadata, merge };
        apply_op(&mut self.entries, op.clone());
        self.append_log(&op)
    }

    fn mark_deleted_many(&mut self, ids: &[String]) -> Result<()> {
        self.require_bulk()?;
        for id in ids {
            let Some(prev) = self.entries.get(id).cloned() else {
                continue;
            };
            if prev.deleted {
                continue;
            }
            self.bulk_undo.push(UndoOp::Restore(id.clone(), prev));
            let op = LogOp::Delete { external_id: id.clone() };
            apply_op(&mut self.entries, op.clone());
            self.append_log(&op)?;
            self.deleted_since_rebuild += 1;
        }
        Ok(())
    }

    fn get_by_internal_id(&self, internal_id: u32) -> Option<(String, MetadataEntry)> {
        self.entries
            .iter()
            .find(|(_, e)| e.internal_id == internal_id && !e.deleted)
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    fn filter_internal_id_set(&self, predicate: &dyn Fn(&serde_json::Value) -> bool) -> RoaringBitmap {
        self.entries
            .values()
            .filter(|e| !e.deleted && predicate(&e.metadata))
            .map(|e| e.internal_id)
            .collect()
    }

    fn alloc_internal_ids(&mut self, n: u32, capacity: u32) -> Result<std::ops::Range<u32>> {
        let start = self.next_internal_id;
        let end = start
            .checked_add(n)
            .ok_or(Error::OutOfCapacity { requested: n, capacity })?;
        if end > capacity {
            return Err(Error::OutOfCapacity { requested: end, capacity });
        }
        self.next_internal_id = end;
        Ok(start..end)
    }

    fn begin_bulk(&mut self) -> Result<()> {
        if self.bulk_depth != 0 {
            return Err(Error::CorruptDump("nested begin_bulk is not supported".into()));
        }
        self.bulk_depth = 1;
        self.bulk_undo.clear();
        Ok(())
    }

    fn end_bulk(&mut self, commit: bool) -> Result<()> {
        if self.bulk_depth == 0 {
            return Err(Error::CorruptDump("end_bulk without begin_bulk".into()));
        }
        self.bulk_depth = 0;
        if !commit {
            for undo in self.bulk_undo.drain(..).rev() {
                match undo {
                    UndoOp::RemoveAdded(id) => {
                        self.entries.remove(&id);
                    }
                    UndoOp::Restore(id, entry) => {
                        self.entries.insert(id, entry);
                    }
                }
            }
        } else {
            self.bulk_undo.clear();
        }
        Ok(())
    }

    fn save_now(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.entries).map_err(|e| Error::CorruptDump(e.to_string()))?;
        let tmp_path = self.path.join(format!("{}.tmp", Self::SNAPSHOT_NAME));
        let final_path = self.path.join(Self::SNAPSHOT_NAME);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        let log_path = self.path.join(Self::LOG_NAME);
        self.log_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
        Ok(())
    }

    fn total_count(&self) -> u32 {
        self.entries.len() as u32
    }

    fn deleted_count(&self) -> u32 {
        self.deleted_since_rebuild
    }

    fn max_allocated_internal_id(&self) -> Option<u32> {
        self.entries.values().map(|e| e.internal_id).max()
    }

    fn active_entries_by_internal_id(&self) -> Vec<(String, MetadataEntry)> {
        let mut active: Vec<(String, MetadataEntry)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.deleted)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        active.sort_by_key(|(_, e)| e.internal_id);
        active
    }

    fn purge_deleted(&mut self) {
        self.entries.retain(|_, e| !e.deleted);
        self.deleted_since_rebuild = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_then_commit_is_visible_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = InMemoryMetadataStore::open(dir.path()).unwrap();
            store.begin_bulk().unwrap();
            store
                .add_many(&[("a".into(), 0, serde_json::json!({"x": 1}))])
                .unwrap();
            store.end_bulk(true).unwrap();
        }
        let store = InMemoryMetadataStore::open(dir.path()).unwrap();
        let got = store.get_many(&["a".into()]);
        assert_eq!(got[0].as_ref().unwrap().internal_id, 0);
    }

    #[test]
    fn rollback_undoes_bulk_mutations() {
        let dir = tempdir().unwrap();
        let mut store = InMemoryMetadataStore::open(dir.path()).unwrap();
        store.begin_bulk().unwrap();
        store
            .add_many(&[("a".into(), 0, serde_json::json!({}))])
            .unwrap();
        store.end_bulk(false).unwrap();
        assert!(store.get_many(&["a".into()])[0].is_none());
    }

    #[test]
    fn save_now_truncates_log() {
        let dir = tempdir().unwrap();
        let mut store = InMemoryMetadataStore::open(dir.path()).unwrap();
        store.begin_bulk().unwrap();
        store
            .add_many(&[("a".into(), 0, serde_json::json!({}))])
            .unwrap();
        store.end_bulk(true).unwrap();
        store.save_now().unwrap();

        let log_path = dir.path().join(InMemoryMetadataStore::LOG_NAME);
        assert_eq!(fs::metadata(&log_path).unwrap().len(), 0);

        let reopened = InMemoryMetadataStore::open(dir.path()).unwrap();
        assert_eq!(reopened.total_count(), 1);
    }

    #[test]
    fn mark_deleted_is_excluded_from_filter() {
        let dir = tempdir().unwrap();
        let mut store = InMemoryMetadataStore::open(dir.path()).unwrap();
        store.begin_bulk().unwrap();
        store
            .add_many(&[("a".into(), 0, serde_json::json!({"active": true}))])
            .unwrap();
        store.mark_deleted_many(&["a".into()]).unwrap();
        store.end_bulk(true).unwrap();

        let ids = store.filter_internal_id_set(&|_| true);
        assert!(ids.is_empty());
        assert_eq!(store.deleted_count(), 1);
    }

    #[test]
    fn purge_deleted_drops_entries_and_resets_counter() {
        let dir = tempdir().unwrap();
        let mut store = InMemoryMetadataStore::open(dir.path()).unwrap();
        store.begin_bulk().unwrap();
        store
            .add_many(&[("a".into(), 0, serde_json::json!({})), ("b".into(), 1, serde_json::json!({}))])
            .unwrap();
        store.mark_deleted_many(&["a".into()]).unwrap();
        store.end_bulk(true).unwrap();

        store.purge_deleted();
        assert_eq!(store.total_count(), 1);
        assert_eq!(store.deleted_count(), 0);
        assert!(store.get_many(&["a".into()])[0].is_none());
        assert!(store.get_many(&["b".into()])[0].is_some());
    }
}
