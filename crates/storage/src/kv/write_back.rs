//! Write-back cache variant of the key-value index abstraction (spec §4.1),
//! used by the chunk index so that new chunks are visible to lookups the
//! instant they're written, while the actual disk write is deferred until
//! the container holding them commits.
//!
//! A dirty entry is *pinned* while its container is still open; pinned
//! entries must never be written back, since the container's address could
//! still be discarded. [`super::disk_hash::DiskHashIndex::open`] matching
//! semantics are not assumed here — any [`KvIndex`] can sit underneath.

use super::traits::KvIndex;
use dedupfs_core::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Outcome of [`WriteBackCache::ensure_persistent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsurePersistentResult {
    /// The entry was flushed to the backing store (or was already clean).
    Ok,
    /// The entry is still pinned; the caller must wait and retry later.
    KeepPinned,
}

struct DirtyEntry {
    value: Vec<u8>,
    pinned: bool,
}

/// Write-back cache over a backing [`KvIndex`].
pub struct WriteBackCache<I: KvIndex> {
    backing: Arc<I>,
    dirty: DashMap<Vec<u8>, DirtyEntry>,
}

impl<I: KvIndex> WriteBackCache<I> {
    /// Wrap `backing` with an empty write-back cache.
    pub fn new(backing: Arc<I>) -> Self {
        Self {
            backing,
            dirty: DashMap::new(),
        }
    }

    /// Look up a key among dirty entries only, returning its value and
    /// whether it is currently pinned.
    pub fn lookup_dirty(&self, key: &[u8]) -> Option<(Vec<u8>, bool)> {
        self.dirty
            .get(key)
            .map(|entry| (entry.value.clone(), entry.pinned))
    }

    /// Look up a key, checking dirty entries first and falling back to the
    /// backing store.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some((value, _)) = self.lookup_dirty(key) {
            return Ok(Some(value));
        }
        Ok(self.backing.lookup(key)?.into_option())
    }

    /// Insert or replace a dirty entry, marking it `pinned` if requested.
    pub fn put_dirty(&self, key: &[u8], value: &[u8], pin: bool) {
        self.dirty.insert(
            key.to_vec(),
            DirtyEntry {
                value: value.to_vec(),
                pinned: pin,
            },
        );
    }

    /// Flush a dirty entry to the backing store unless it is still pinned.
    pub fn ensure_persistent(&self, key: &[u8]) -> Result<EnsurePersistentResult> {
        let Some(entry) = self.dirty.get(key) else {
            return Ok(EnsurePersistentResult::Ok);
        };
        if entry.pinned {
            return Ok(EnsurePersistentResult::KeepPinned);
        }
        let value = entry.value.clone();
        drop(entry);
        self.backing.put(key, &value)?;
        self.dirty.remove(key);
        Ok(EnsurePersistentResult::Ok)
    }

    /// Flip the pinning state of a dirty entry (called on container commit
    /// to unpin every chunk that container held).
    pub fn change_pinning_state(&self, key: &[u8], pinned: bool) {
        if let Some(mut entry) = self.dirty.get_mut(key) {
            entry.pinned = pinned;
        }
    }

    /// Attempt to flush up to `batch_size` unpinned dirty entries to the
    /// backing store, returning how many were persisted.
    pub fn try_persist_dirty_item(&self, batch_size: usize) -> Result<usize> {
        let candidates: Vec<Vec<u8>> = self
            .dirty
            .iter()
            .filter(|entry| !entry.pinned)
            .take(batch_size)
            .map(|entry| entry.key().clone())
            .collect();
        let mut persisted = 0;
        for key in candidates {
            if self.ensure_persistent(&key)? == EnsurePersistentResult::Ok {
                persisted += 1;
            }
        }
        Ok(persisted)
    }

    /// Number of entries not yet written back.
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::redb_index::RedbIndex;
    use tempfile::tempdir;

    fn cache() -> (tempfile::TempDir, WriteBackCache<RedbIndex>) {
        let dir = tempdir().unwrap();
        let backing = Arc::new(RedbIndex::open(&dir.path().join("db")).unwrap());
        (dir, WriteBackCache::new(backing))
    }

    #[test]
    fn pinned_entry_blocks_persistence() {
        let (_dir, cache) = cache();
        cache.put_dirty(b"fp1", b"addr1", true);
        assert_eq!(
            cache.ensure_persistent(b"fp1").unwrap(),
            EnsurePersistentResult::KeepPinned
        );
        assert_eq!(cache.dirty_count(), 1);
    }

    #[test]
    fn unpinning_then_persisting_flushes_to_backing_store() {
        let (_dir, cache) = cache();
        cache.put_dirty(b"fp1", b"addr1", true);
        cache.change_pinning_state(b"fp1", false);
        assert_eq!(
            cache.ensure_persistent(b"fp1").unwrap(),
            EnsurePersistentResult::Ok
        );
        assert_eq!(cache.dirty_count(), 0);
        assert_eq!(cache.lookup(b"fp1").unwrap(), Some(b"addr1".to_vec()));
    }

    #[test]
    fn try_persist_dirty_item_respects_batch_size_and_pinning() {
        let (_dir, cache) = cache();
        cache.put_dirty(b"fp1", b"addr1", false);
        cache.put_dirty(b"fp2", b"addr2", false);
        cache.put_dirty(b"fp3", b"addr3", true);
        let persisted = cache.try_persist_dirty_item(1).unwrap();
        assert_eq!(persisted, 1);
        assert_eq!(cache.dirty_count(), 2);
    }

    #[test]
    fn lookup_prefers_dirty_value_over_backing_store() {
        let (_dir, cache) = cache();
        cache.backing.put(b"fp1", b"stale").unwrap();
        cache.put_dirty(b"fp1", b"fresh", false);
        assert_eq!(cache.lookup(b"fp1").unwrap(), Some(b"fresh".to_vec()));
    }
}
