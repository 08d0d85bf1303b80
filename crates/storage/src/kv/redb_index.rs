//! `redb`-backed [`KvIndex`] implementation.
//!
//! `redb` is an embedded, ACID, B-tree-organized key-value store — a real
//! crate already present (as an optional comparison dependency) in the
//! teacher repo's root `Cargo.toml`. Here it is promoted to a first-class
//! dependency and used as the concrete "disk B-tree" / "fixed-width
//! ID-keyed store" backend spec §4.1 calls for: the metadata index, the
//! persistent block index, the failed-block-write index, the container
//! tracker, and the bitmap allocator's page store all share this one
//! implementation, distinguished only by which table name and key/value
//! encoding the caller picks.

use super::traits::{
    Capabilities, DeleteResult, KvIndex, LookupResult, PutIfAbsentResult, PutResult,
};
use dedupfs_core::{Error, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// A single-table, byte-keyed/byte-valued `redb` database.
pub struct RedbIndex {
    db: Database,
}

impl RedbIndex {
    /// Open (creating if necessary) a `redb` database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| Error::Io(to_io_error(e)))?;
        let write_txn = db.begin_write().map_err(|e| Error::Io(to_io_error(e)))?;
        {
            let _ = write_txn
                .open_table(TABLE)
                .map_err(|e| Error::Io(to_io_error(e)))?;
        }
        write_txn.commit().map_err(|e| Error::Io(to_io_error(e)))?;
        Ok(Self { db })
    }
}

fn to_io_error<E: std::fmt::Display>(e: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

impl KvIndex for RedbIndex {
    fn capabilities(&self) -> Capabilities {
        Capabilities::PERSISTENT_ITEM_COUNT | Capabilities::HAS_ITERATOR
    }

    fn lookup(&self, key: &[u8]) -> Result<LookupResult<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(|e| Error::Io(to_io_error(e)))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| Error::Io(to_io_error(e)))?;
        match table.get(key).map_err(|e| Error::Io(to_io_error(e)))? {
            Some(v) => Ok(LookupResult::Found(v.value().to_vec())),
            None => Ok(LookupResult::NotFound),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<PutResult> {
        if let LookupResult::Found(existing) = self.lookup(key)? {
            if existing == value {
                return Ok(PutResult::Keep);
            }
        }
        let write_txn = self.db.begin_write().map_err(|e| Error::Io(to_io_error(e)))?;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| Error::Io(to_io_error(e)))?;
            table
                .insert(key, value)
                .map_err(|e| Error::Io(to_io_error(e)))?;
        }
        write_txn.commit().map_err(|e| Error::Io(to_io_error(e)))?;
        Ok(PutResult::Ok)
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<PutIfAbsentResult> {
        let write_txn = self.db.begin_write().map_err(|e| Error::Io(to_io_error(e)))?;
        let result;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| Error::Io(to_io_error(e)))?;
            if table.get(key).map_err(|e| Error::Io(to_io_error(e)))?.is_some() {
                result = PutIfAbsentResult::AlreadyExists;
            } else {
                table
                    .insert(key, value)
                    .map_err(|e| Error::Io(to_io_error(e)))?;
                result = PutIfAbsentResult::Ok;
            }
        }
        write_txn.commit().map_err(|e| Error::Io(to_io_error(e)))?;
        Ok(result)
    }

    fn delete(&self, key: &[u8]) -> Result<DeleteResult> {
        let write_txn = self.db.begin_write().map_err(|e| Error::Io(to_io_error(e)))?;
        let result;
        {
            let mut table = write_txn
                .open_table(TABLE)
                .map_err(|e| Error::Io(to_io_error(e)))?;
            let removed = table.remove(key).map_err(|e| Error::Io(to_io_error(e)))?;
            result = if removed.is_some() {
                DeleteResult::Ok
            } else {
                DeleteResult::NotFound
            };
        }
        write_txn.commit().map_err(|e| Error::Io(to_io_error(e)))?;
        Ok(result)
    }

    fn item_count(&self) -> u64 {
        let Ok(read_txn) = self.db.begin_read() else {
            return 0;
        };
        let Ok(table) = read_txn.open_table(TABLE) else {
            return 0;
        };
        table.len().unwrap_or(0)
    }

    fn create_iterator(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(|e| Error::Io(to_io_error(e)))?;
        let table = read_txn
            .open_table(TABLE)
            .map_err(|e| Error::Io(to_io_error(e)))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| Error::Io(to_io_error(e)))? {
            let (k, v) = entry.map_err(|e| Error::Io(to_io_error(e)))?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let index = RedbIndex::open(&dir.path().join("test.redb")).unwrap();
        assert_eq!(index.put(b"k1", b"v1").unwrap(), PutResult::Ok);
        assert_eq!(
            index.lookup(b"k1").unwrap(),
            LookupResult::Found(b"v1".to_vec())
        );
    }

    #[test]
    fn identical_put_returns_keep() {
        let dir = tempdir().unwrap();
        let index = RedbIndex::open(&dir.path().join("test.redb")).unwrap();
        index.put(b"k1", b"v1").unwrap();
        assert_eq!(index.put(b"k1", b"v1").unwrap(), PutResult::Keep);
    }

    #[test]
    fn put_if_absent_rejects_existing_key() {
        let dir = tempdir().unwrap();
        let index = RedbIndex::open(&dir.path().join("test.redb")).unwrap();
        index.put(b"k1", b"v1").unwrap();
        assert_eq!(
            index.put_if_absent(b"k1", b"v2").unwrap(),
            PutIfAbsentResult::AlreadyExists
        );
    }

    #[test]
    fn delete_missing_key_reports_not_found() {
        let dir = tempdir().unwrap();
        let index = RedbIndex::open(&dir.path().join("test.redb")).unwrap();
        assert_eq!(index.delete(b"missing").unwrap(), DeleteResult::NotFound);
    }

    #[test]
    fn iterator_sees_all_entries() {
        let dir = tempdir().unwrap();
        let index = RedbIndex::open(&dir.path().join("test.redb")).unwrap();
        index.put(b"a", b"1").unwrap();
        index.put(b"b", b"2").unwrap();
        let entries = index.create_iterator().unwrap();
        assert_eq!(entries.len(), 2);
    }
}
