//! Chunk index (spec §4.5): `fp -> (data_address, usage_count_change_log_id,
//! block_hint)`, backed by a write-back cache so a chunk is visible to
//! lookups the instant it is written, before its container has committed.
//!
//! Grounded on [`dedupfs_storage::kv::write_back::WriteBackCache`] for the
//! pin/unpin mechanics and on `examples/original_source/base/src/disk_hash_index_transaction.cc`
//! for choosing a disk-hash-with-transactions backend underneath it.

use dashmap::{DashMap, DashSet};
use dedupfs_core::{BlockId, ChunkMapping, ContainerId, Fingerprint, LogId, Result};
use dedupfs_durability::{EventPayload, LogConsumer, LogReplayContext, LogRecord, ReplayMode};
use dedupfs_storage::kv::{EnsurePersistentResult, KvIndex, WriteBackCache};
use std::sync::Arc;

fn encode_value(mapping: &ChunkMapping) -> Result<Vec<u8>> {
    mapping
        .serialize_to()
        .map_err(|e| dedupfs_core::Error::Corruption(format!("chunk mapping encode: {e}")))
}

fn decode_value(bytes: &[u8]) -> Result<ChunkMapping> {
    ChunkMapping::unserialize_from(bytes)
        .map_err(|e| dedupfs_core::Error::Corruption(format!("chunk mapping decode: {e}")))
}

/// Shields `(fp, container_id)` pairs from lookup while a GC pass is
/// deciding whether to reclaim them, so a concurrent write referencing the
/// same chunk doesn't race a collector that already decided it's dead.
#[derive(Default)]
pub struct ChunkIndexInCombats {
    set: DashSet<(Fingerprint, ContainerId)>,
}

impl ChunkIndexInCombats {
    /// Construct an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a chunk as under GC consideration.
    pub fn enter(&self, fp: Fingerprint, container_id: ContainerId) {
        self.set.insert((fp, container_id));
    }

    /// Release a chunk from GC consideration.
    pub fn leave(&self, fp: &Fingerprint, container_id: ContainerId) {
        self.set.remove(&(fp.clone(), container_id));
    }

    /// True if `(fp, container_id)` is currently shielded.
    pub fn contains(&self, fp: &Fingerprint, container_id: ContainerId) -> bool {
        self.set.contains(&(fp.clone(), container_id))
    }
}

/// The chunk index: the fingerprint-keyed map from chunk content to its
/// location, pinned while the owning container is still open.
pub struct ChunkIndex<I: KvIndex> {
    cache: WriteBackCache<I>,
    pending_by_container: DashMap<ContainerId, Vec<Fingerprint>>,
    in_combats: ChunkIndexInCombats,
}

impl<I: KvIndex> ChunkIndex<I> {
    /// Wrap a backend (normally [`dedupfs_storage::kv::DiskHashIndex`]).
    pub fn new(backend: Arc<I>) -> Self {
        Self {
            cache: WriteBackCache::new(backend),
            pending_by_container: DashMap::new(),
            in_combats: ChunkIndexInCombats::new(),
        }
    }

    /// Resolve a fingerprint to its chunk mapping, checking the write-back
    /// cache before falling back to the backing store. A mapping whose
    /// `(fp, container)` pair is currently shielded by [`ChunkIndexInCombats`]
    /// is treated as not found, so a concurrent write can't dedup onto a
    /// chunk a GC pass has already decided to reclaim.
    pub fn lookup(&self, fp: &Fingerprint) -> Result<Option<ChunkMapping>> {
        match self.cache.lookup(fp.as_bytes())? {
            Some(bytes) => {
                let mapping = decode_value(&bytes)?;
                if self.in_combats.contains(fp, mapping.data_address) {
                    return Ok(None);
                }
                Ok(Some(mapping))
            }
            None => Ok(None),
        }
    }

    /// Record a newly written chunk, pinned to the container it was written
    /// into until that container commits.
    pub fn record_write(
        &self,
        fp: Fingerprint,
        data_address: ContainerId,
        usage_count_change_log_id: Option<LogId>,
        block_hint: Option<BlockId>,
    ) -> Result<()> {
        let mapping = ChunkMapping {
            fp: fp.clone(),
            data_address,
            usage_count_change_log_id,
            block_hint,
        };
        let bytes = encode_value(&mapping)?;
        self.cache.put_dirty(fp.as_bytes(), &bytes, true);
        self.pending_by_container
            .entry(data_address)
            .or_default()
            .push(fp);
        Ok(())
    }

    /// Unpin every chunk written into `container_id`, making them eligible
    /// for write-back.
    pub fn unpin_container(&self, container_id: ContainerId) {
        if let Some((_, fps)) = self.pending_by_container.remove(&container_id) {
            for fp in fps {
                self.cache.change_pinning_state(fp.as_bytes(), false);
            }
        }
    }

    /// Attempt to flush up to `batch_size` unpinned dirty entries.
    pub fn try_persist_dirty_item(&self, batch_size: usize) -> Result<usize> {
        self.cache.try_persist_dirty_item(batch_size)
    }

    /// Force-flush a single fingerprint's entry, if present and unpinned.
    pub fn ensure_persistent(&self, fp: &Fingerprint) -> Result<EnsurePersistentResult> {
        self.cache.ensure_persistent(fp.as_bytes())
    }

    /// The in-combats shield set.
    pub fn in_combats(&self) -> &ChunkIndexInCombats {
        &self.in_combats
    }

    /// Number of dirty (not yet written back) entries.
    pub fn dirty_count(&self) -> usize {
        self.cache.dirty_count()
    }
}

impl<I: KvIndex> LogConsumer for ChunkIndex<I> {
    fn name(&self) -> &str {
        "chunk-index"
    }

    fn replay_modes(&self) -> &[ReplayMode] {
        &[ReplayMode::Direct, ReplayMode::DirtyStart]
    }

    fn consume(&self, record: &LogRecord, _ctx: LogReplayContext) {
        if let EventPayload::ContainerCommitted { id, .. } = &record.payload {
            self.unpin_container(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_storage::kv::RedbIndex;
    use tempfile::tempdir;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::new(vec![byte; 8]).unwrap()
    }

    fn index() -> (tempfile::TempDir, ChunkIndex<RedbIndex>) {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbIndex::open(&dir.path().join("chunk.redb")).unwrap());
        (dir, ChunkIndex::new(backend))
    }

    #[test]
    fn newly_written_chunk_is_visible_before_commit() {
        let (_dir, idx) = index();
        let container = ContainerId::from_raw(1);
        idx.record_write(fp(1), container, None, None).unwrap();
        let mapping = idx.lookup(&fp(1)).unwrap().unwrap();
        assert_eq!(mapping.data_address, container);
    }

    #[test]
    fn pinned_entry_does_not_persist_until_container_commits() {
        let (_dir, idx) = index();
        let container = ContainerId::from_raw(2);
        idx.record_write(fp(1), container, None, None).unwrap();
        assert_eq!(
            idx.ensure_persistent(&fp(1)).unwrap(),
            EnsurePersistentResult::KeepPinned
        );

        idx.unpin_container(container);
        assert_eq!(
            idx.ensure_persistent(&fp(1)).unwrap(),
            EnsurePersistentResult::Ok
        );
        assert_eq!(idx.dirty_count(), 0);
    }

    #[test]
    fn container_committed_event_unpins_via_log_consumer() {
        let (_dir, idx) = index();
        let container = ContainerId::from_raw(3);
        idx.record_write(fp(1), container, None, None).unwrap();

        let record = LogRecord::new(
            LogId(1),
            EventPayload::ContainerCommitted {
                id: container,
                address: dedupfs_core::ContainerAddress::new(0, 0, 4096),
                active_data_size: 16,
                item_count: 1,
            },
        );
        idx.consume(&record, LogReplayContext::new(ReplayMode::Direct));

        assert_eq!(
            idx.ensure_persistent(&fp(1)).unwrap(),
            EnsurePersistentResult::Ok
        );
    }

    #[test]
    fn in_combats_shields_chunk_by_container_pair() {
        let (_dir, idx) = index();
        let container = ContainerId::from_raw(5);
        assert!(!idx.in_combats().contains(&fp(9), container));
        idx.in_combats().enter(fp(9), container);
        assert!(idx.in_combats().contains(&fp(9), container));
        idx.in_combats().leave(&fp(9), container);
        assert!(!idx.in_combats().contains(&fp(9), container));
    }

    #[test]
    fn in_combats_shields_the_chunk_from_lookup_itself() {
        let (_dir, idx) = index();
        let container = ContainerId::from_raw(9);
        idx.record_write(fp(9), container, None, None).unwrap();
        assert!(idx.lookup(&fp(9)).unwrap().is_some());

        idx.in_combats().enter(fp(9), container);
        assert!(idx.lookup(&fp(9)).unwrap().is_none());

        idx.in_combats().leave(&fp(9), container);
        assert!(idx.lookup(&fp(9)).unwrap().is_some());
    }
}
