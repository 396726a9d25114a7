//! The post-snapshot crash-recovery log (§6 "Oplog", §4.F).
//!
//! UTF-8 text, one record per line: `U <id>` for upsert, `D <id>` for soft
//! delete. Truncated to zero bytes only after a successful snapshot
//! rename, never before — so a crash between "append oplog" and "truncate"
//! just means recovery replays a few already-applied records, which
//! [`crate::engine::HnswIndex::insert`] dedupes to `update_and_reconnect`.

use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One parsed oplog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpRecord {
    /// `U <id>`: the id was inserted or updated since the last snapshot.
    Upsert(u32),
    /// `D <id>`: the id was soft-deleted since the last snapshot.
    Delete(u32),
}

/// Handle on the append-only oplog file.
pub struct Oplog {
    path: PathBuf,
    file: File,
}

impl Oplog {
    const FILE_NAME: &'static str = "ann.oplog";

    /// Opens (creating if absent) the oplog under `dir`.
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Appends `U <id>` and fsyncs (§4.F insert pipeline step 7).
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    pub fn append_upsert(&mut self, id: u32) -> Result<()> {
        self.append_line(&format!("U {id}"))
    }

    /// Appends `D <id>` (§4.F "Delete").
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    pub fn append_delete(&mut self, id: u32) -> Result<()> {
        self.append_line(&format!("D {id}"))
    }

    fn append_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{line}")?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Parses every record currently in the log, in file order, skipping
    /// blank or unrecognized lines rather than failing the whole replay.
    ///
    /// # Errors
    /// Propagates the underlying I/O failure reading the file.
    pub fn read_all(&self) -> Result<Vec<OpRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let mut parts = line.split_whitespace();
            let (Some(tag), Some(id_str)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(id) = id_str.parse::<u32>() else {
                continue;
            };
            match tag {
                "U" => records.push(OpRecord::Upsert(id)),
                "D" => records.push(OpRecord::Delete(id)),
                _ => {}
            }
        }
        Ok(records)
    }

    /// Truncates the log to zero bytes (§4.F "Snapshot": "Truncate the
    /// oplog only after successful rename").
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    pub fn truncate(&mut self) -> Result<()> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .read(true)
            .append(false)
            .open(&self.path)?;
        self.file = OpenOptions::new().create(true).append(true).read(true).open(&self.path)?;
        Ok(())
    }

    /// Current size in bytes.
    ///
    /// # Errors
    /// Propagates the underlying I/O failure.
    pub fn len_bytes(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trips() {
        let dir = tempdir().unwrap();
        let mut log = Oplog::open(dir.path()).unwrap();
        log.append_upsert(3).unwrap();
        log.append_delete(7).unwrap();
        log.append_upsert(3).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(
            records,
            vec![OpRecord::Upsert(3), OpRecord::Delete(7), OpRecord::Upsert(3)]
        );
    }

    #[test]
    fn truncate_empties_the_log() {
        let dir = tempdir().unwrap();
        let mut log = Oplog::open(dir.path()).unwrap();
        log.append_upsert(1).unwrap();
        log.truncate().unwrap();
        assert_eq!(log.len_bytes().unwrap(), 0);
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(Oplog::FILE_NAME);
        fs::write(&path, "U 1\nnonsense\nD abc\nU 2\n").unwrap();
        let log = Oplog::open(dir.path()).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![OpRecord::Upsert(1), OpRecord::Upsert(2)]);
    }
}
