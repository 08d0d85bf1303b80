//! Block index (spec §4.6): the auxiliary in-memory index that makes a
//! freshly committed block mapping visible immediately, the persistent
//! index that survives restarts, a background importer that migrates
//! entries from one to the other under throttling, and the failed block
//! index (spec §4.6.4).

use dashmap::DashMap;
use dedupfs_core::{
    limits::{DEFAULT_AUX_SOFT_LIMIT, DEFAULT_IMPORT_BATCH_SIZE, MIN_AUX_HARD_LIMIT},
    BlockId, BlockMapping, LogId, Result,
};
use dedupfs_storage::kv::{KvIndex, LookupResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

fn encode_key(block_id: BlockId) -> [u8; 8] {
    block_id.0.to_le_bytes()
}

fn encode_mapping(mapping: &BlockMapping) -> Result<Vec<u8>> {
    mapping
        .serialize_to()
        .map_err(|e| dedupfs_core::Error::Corruption(format!("block mapping encode: {e}")))
}

fn decode_mapping(bytes: &[u8]) -> Result<BlockMapping> {
    BlockMapping::unserialize_from(bytes)
        .map_err(|e| dedupfs_core::Error::Corruption(format!("block mapping decode: {e}")))
}

/// In-memory index of block mappings a caller can read before they've
/// reached the persistent index. Stores every write the instant it's logged
/// (so a just-written block is visible immediately, whether or not its
/// containers have committed yet — the same pinned-before-commit treatment
/// [`crate::chunk_index::ChunkIndex`] gives chunks); a mapping additionally
/// becomes *eligible for import* only once [`crate::promotion::BlockPromotionConsumer`]
/// confirms (via the volatile block store) that every container it
/// references has committed, at which point it's pushed onto the import
/// queue by its own snapshot rather than re-read from `entries` — a second
/// write to the same block between commit-ready and import must not let the
/// newer, not-yet-ready mapping jump the queue.
#[derive(Default)]
pub struct AuxiliaryBlockIndex {
    entries: DashMap<BlockId, BlockMapping>,
    import_queue: Mutex<VecDeque<BlockMapping>>,
}

impl AuxiliaryBlockIndex {
    /// Construct an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a mapping visible to reads immediately, regardless of whether
    /// its containers have committed yet.
    pub fn store_block(&self, mapping: BlockMapping) {
        self.entries.insert(mapping.block_id, mapping);
    }

    /// Queue a commit-ready mapping for background import. Takes the exact
    /// mapping that became ready (not a re-read of `entries`, which may
    /// already hold a newer, not-yet-ready write for the same block).
    pub fn queue_for_import(&self, mapping: BlockMapping) {
        self.import_queue.lock().push_back(mapping);
    }

    /// Look up a block's most recent mapping, if it's still resident here.
    pub fn lookup(&self, block_id: BlockId) -> Option<BlockMapping> {
        self.entries.get(&block_id).map(|e| e.clone())
    }

    /// Pop up to `n` queued, commit-ready mappings.
    pub fn take_batch(&self, n: usize) -> Vec<BlockMapping> {
        let mut queue = self.import_queue.lock();
        let mut batch = Vec::with_capacity(n.min(queue.len()));
        while batch.len() < n {
            let Some(mapping) = queue.pop_front() else {
                break;
            };
            batch.push(mapping);
        }
        batch
    }

    /// Remove a block's entry once its mapping has been durably imported,
    /// provided no newer write has replaced it in the meantime.
    pub fn mark_imported(&self, block_id: BlockId, imported_version: u64) {
        if let dashmap::mapref::entry::Entry::Occupied(entry) = self.entries.entry(block_id) {
            if entry.get().version == imported_version {
                entry.remove();
            }
        }
    }

    /// Number of entries awaiting import.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persistent `block_id -> mapping` index (spec §4.6.2).
pub struct PersistentBlockIndex<I: KvIndex> {
    backend: Arc<I>,
}

impl<I: KvIndex> PersistentBlockIndex<I> {
    /// Wrap a backend.
    pub fn new(backend: Arc<I>) -> Self {
        Self { backend }
    }

    /// Resolve a block's durable mapping.
    pub fn lookup(&self, block_id: BlockId) -> Result<Option<BlockMapping>> {
        match self.backend.lookup(&encode_key(block_id))? {
            LookupResult::Found(bytes) => Ok(Some(decode_mapping(&bytes)?)),
            LookupResult::NotFound => Ok(None),
        }
    }

    /// Durably record a block's mapping.
    pub fn put(&self, mapping: &BlockMapping) -> Result<()> {
        let bytes = encode_mapping(mapping)?;
        self.backend.put(&encode_key(mapping.block_id), &bytes)?;
        Ok(())
    }

    /// Number of durable block mappings.
    pub fn item_count(&self) -> u64 {
        self.backend.item_count()
    }
}

/// Persistent record of blocks whose write failed after being logged (spec
/// §4.6.4): kept distinct from the main index so a retried write is not
/// silently shadowed by a dangling earlier attempt.
pub struct FailedBlockIndex<I: KvIndex> {
    backend: Arc<I>,
}

impl<I: KvIndex> FailedBlockIndex<I> {
    /// Wrap a backend.
    pub fn new(backend: Arc<I>) -> Self {
        Self { backend }
    }

    /// Record that `block_id`'s write failed, citing the log id of the
    /// `BlockMappingWriteFailed` event, if one was appended.
    pub fn mark_failed(&self, block_id: BlockId, write_event_log_id: Option<LogId>) -> Result<()> {
        let value = write_event_log_id.map(|id| id.0).unwrap_or(u64::MAX).to_le_bytes();
        self.backend.put(&encode_key(block_id), &value)?;
        Ok(())
    }

    /// True if `block_id` has an outstanding failure record.
    pub fn is_failed(&self, block_id: BlockId) -> Result<bool> {
        Ok(self.backend.lookup(&encode_key(block_id))?.is_found())
    }

    /// Clear a block's failure record once it has been retried successfully.
    pub fn clear(&self, block_id: BlockId) -> Result<()> {
        self.backend.delete(&encode_key(block_id))?;
        Ok(())
    }
}

/// How hard the background importer should be working right now (spec
/// §4.6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPressure {
    /// Below the soft limit: import at the configured batch size on its
    /// normal schedule.
    Normal,
    /// At or above the soft limit: import more aggressively to work the
    /// backlog down.
    SoftLimit,
    /// At or above the hard limit: new writes should be throttled at the
    /// source until the backlog drops.
    HardLimit,
}

/// Importer configuration (spec §4.6.3).
#[derive(Debug, Clone, Copy)]
pub struct ImporterConfig {
    /// Entries migrated per batch under normal pressure.
    pub batch_size: usize,
    /// Aux-index size at which pressure becomes [`ImportPressure::SoftLimit`].
    pub soft_limit: usize,
    /// Aux-index size at which pressure becomes [`ImportPressure::HardLimit`].
    pub hard_limit: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        let soft_limit = DEFAULT_AUX_SOFT_LIMIT;
        Self {
            batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            soft_limit,
            hard_limit: (soft_limit * 2).max(MIN_AUX_HARD_LIMIT),
        }
    }
}

/// Migrates entries from the auxiliary index to the persistent index,
/// marking import failures in the failed block index (spec §4.6.3, §4.6.4).
pub struct BackgroundImporter<I: KvIndex, F: KvIndex> {
    config: ImporterConfig,
    aux: Arc<AuxiliaryBlockIndex>,
    persistent: Arc<PersistentBlockIndex<I>>,
    failed: Arc<FailedBlockIndex<F>>,
}

impl<I: KvIndex, F: KvIndex> BackgroundImporter<I, F> {
    /// Construct an importer over the three indexes it coordinates.
    pub fn new(
        config: ImporterConfig,
        aux: Arc<AuxiliaryBlockIndex>,
        persistent: Arc<PersistentBlockIndex<I>>,
        failed: Arc<FailedBlockIndex<F>>,
    ) -> Self {
        Self {
            config,
            aux,
            persistent,
            failed,
        }
    }

    /// Current import pressure, based on the auxiliary index's backlog.
    pub fn pressure(&self) -> ImportPressure {
        let len = self.aux.len();
        if len >= self.config.hard_limit {
            ImportPressure::HardLimit
        } else if len >= self.config.soft_limit {
            ImportPressure::SoftLimit
        } else {
            ImportPressure::Normal
        }
    }

    /// The batch size to use right now: the configured default under normal
    /// pressure, doubled while working off a soft-limit backlog, unbounded
    /// (the whole queue) under a hard-limit backlog.
    fn effective_batch_size(&self) -> usize {
        match self.pressure() {
            ImportPressure::Normal => self.config.batch_size,
            ImportPressure::SoftLimit => self.config.batch_size * 2,
            ImportPressure::HardLimit => self.aux.len(),
        }
    }

    /// Migrate one batch from the auxiliary index to the persistent index.
    /// Returns the number of entries successfully imported.
    pub fn run_batch(&self) -> Result<usize> {
        let batch = self.aux.take_batch(self.effective_batch_size());
        let mut imported = 0;
        for mapping in batch {
            let block_id = mapping.block_id;
            let version = mapping.version;
            match self.persistent.put(&mapping) {
                Ok(()) => {
                    self.aux.mark_imported(block_id, version);
                    self.failed.clear(block_id)?;
                    imported += 1;
                }
                Err(e) => {
                    tracing::error!(block_id = block_id.0, error = %e, "block index import failed");
                    self.failed.mark_failed(block_id, None)?;
                }
            }
        }
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_core::BlockId;
    use dedupfs_storage::kv::RedbIndex;
    use tempfile::tempdir;

    fn mapping(block_id: u64, version: u64) -> BlockMapping {
        let mut m = BlockMapping::initial(BlockId(block_id), 4096);
        m.version = version;
        m
    }

    #[test]
    fn auxiliary_lookup_sees_entry_before_import() {
        let aux = AuxiliaryBlockIndex::new();
        aux.store_block(mapping(1, 0));
        assert!(aux.lookup(BlockId(1)).is_some());
    }

    #[test]
    fn take_batch_respects_limit_and_leaves_remainder_queued() {
        let aux = AuxiliaryBlockIndex::new();
        aux.queue_for_import(mapping(1, 0));
        aux.queue_for_import(mapping(2, 0));
        aux.queue_for_import(mapping(3, 0));
        let batch = aux.take_batch(2);
        assert_eq!(batch.len(), 2);
        let rest = aux.take_batch(10);
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn store_block_is_visible_without_being_import_eligible() {
        // A write that's visible to reads but still waiting on its
        // container to commit must not be picked up by `take_batch`.
        let aux = AuxiliaryBlockIndex::new();
        aux.store_block(mapping(1, 0));
        assert!(aux.lookup(BlockId(1)).is_some());
        assert!(aux.take_batch(10).is_empty());
    }

    #[test]
    fn newer_write_does_not_let_an_older_ready_mapping_import_as_itself() {
        // Block 1 is written twice; only the first version is commit-ready
        // and queued. `entries` already holds the newer, not-yet-ready
        // version, but `take_batch` must still hand back the one that was
        // actually queued.
        let aux = AuxiliaryBlockIndex::new();
        aux.store_block(mapping(1, 0));
        aux.queue_for_import(mapping(1, 0));
        aux.store_block(mapping(1, 1));

        let batch = aux.take_batch(10);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].version, 0);
        assert_eq!(aux.lookup(BlockId(1)).unwrap().version, 1);
    }

    #[test]
    fn background_importer_migrates_to_persistent_index() {
        let dir = tempdir().unwrap();
        let aux = Arc::new(AuxiliaryBlockIndex::new());
        let persistent = Arc::new(PersistentBlockIndex::new(Arc::new(
            RedbIndex::open(&dir.path().join("blocks.redb")).unwrap(),
        )));
        let failed = Arc::new(FailedBlockIndex::new(Arc::new(
            RedbIndex::open(&dir.path().join("failed.redb")).unwrap(),
        )));
        aux.store_block(mapping(1, 0));
        aux.queue_for_import(mapping(1, 0));

        let importer = BackgroundImporter::new(ImporterConfig::default(), aux.clone(), persistent.clone(), failed);
        let imported = importer.run_batch().unwrap();
        assert_eq!(imported, 1);
        assert!(aux.is_empty());
        assert!(persistent.lookup(BlockId(1)).unwrap().is_some());
    }

    #[test]
    fn pressure_escalates_with_backlog_size() {
        let dir = tempdir().unwrap();
        let aux = Arc::new(AuxiliaryBlockIndex::new());
        let persistent = Arc::new(PersistentBlockIndex::new(Arc::new(
            RedbIndex::open(&dir.path().join("blocks.redb")).unwrap(),
        )));
        let failed = Arc::new(FailedBlockIndex::new(Arc::new(
            RedbIndex::open(&dir.path().join("failed.redb")).unwrap(),
        )));
        let config = ImporterConfig {
            batch_size: 4,
            soft_limit: 2,
            hard_limit: 4,
        };
        let importer = BackgroundImporter::new(config, aux.clone(), persistent, failed);
        assert_eq!(importer.pressure(), ImportPressure::Normal);

        aux.store_block(mapping(1, 0));
        aux.store_block(mapping(2, 0));
        assert_eq!(importer.pressure(), ImportPressure::SoftLimit);

        aux.store_block(mapping(3, 0));
        aux.store_block(mapping(4, 0));
        assert_eq!(importer.pressure(), ImportPressure::HardLimit);
    }

    #[test]
    fn mark_imported_ignores_stale_version_after_overwrite() {
        let aux = AuxiliaryBlockIndex::new();
        aux.store_block(mapping(1, 0));
        aux.store_block(mapping(1, 1));
        // An import of the stale (version 0) snapshot must not evict the
        // newer entry that has since replaced it.
        aux.mark_imported(BlockId(1), 0);
        assert!(aux.lookup(BlockId(1)).is_some());
        aux.mark_imported(BlockId(1), 1);
        assert!(aux.lookup(BlockId(1)).is_none());
    }
}
