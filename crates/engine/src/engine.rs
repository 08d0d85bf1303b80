//! Top-level engine facade (spec §2): wires the container storage, chunk
//! index, block index, volatile block store, and operation log into the
//! write/read data path, and owns graceful shutdown.

use crate::block_index::{AuxiliaryBlockIndex, BackgroundImporter, FailedBlockIndex, ImporterConfig, PersistentBlockIndex};
use crate::chunk_index::ChunkIndex;
use crate::container_tracker::ContainerTracker;
use crate::info::InfoFile;
use crate::promotion::BlockPromotionConsumer;
use crate::shutdown::{ShutdownStage, ShutdownTracker};

use dedupfs_concurrency::{BlockLocks, ChunkLocks, IdleDetector, VolatileBlockStore};
use dedupfs_core::limits::{DEFAULT_LOCK_SHARD_COUNT, LEAST_VALID_CONTAINER_ID};
use dedupfs_core::{BlockId, BlockMapping, BlockMappingItem, BlockMappingPair, ContainerIdGenerator, Error, Fingerprint, Result};
use dedupfs_durability::{ConsumerRegistry, EventPayload, LogConsumer, OperationLog};
use dedupfs_storage::kv::{DiskHashConfig, DiskHashIndex, RedbIndex};
use dedupfs_storage::{ContainerStorage, ContainerStorageConfig, FileSetAllocator, MetadataIndex};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Tuning knobs for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size in bytes of a volume block (spec §3).
    pub block_size: u32,
    /// Container storage layer configuration.
    pub storage: ContainerStorageConfig,
    /// Block index background importer configuration.
    pub importer: ImporterConfig,
    /// Chunk index disk-hash backend configuration.
    pub chunk_disk_hash: DiskHashConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            storage: ContainerStorageConfig::default(),
            importer: ImporterConfig::default(),
            chunk_disk_hash: DiskHashConfig::default(),
        }
    }
}

/// The dedup storage engine: the single entry point a volume/iSCSI-facing
/// caller writes and reads blocks through.
pub struct Engine {
    config: EngineConfig,
    data_dir: PathBuf,
    info_path: PathBuf,

    storage: Arc<ContainerStorage>,
    chunk_index: Arc<ChunkIndex<DiskHashIndex>>,
    volatile: Arc<VolatileBlockStore>,
    aux_block_index: Arc<AuxiliaryBlockIndex>,
    persistent_block_index: Arc<PersistentBlockIndex<RedbIndex>>,
    importer: Arc<BackgroundImporter<RedbIndex, RedbIndex>>,
    container_tracker: Arc<ContainerTracker<RedbIndex>>,
    promotion: Arc<BlockPromotionConsumer>,

    id_generator: Arc<ContainerIdGenerator>,
    log: Arc<OperationLog>,

    block_locks: BlockLocks,
    chunk_locks: ChunkLocks,
    idle: Arc<IdleDetector>,
    shutdown_tracker: ShutdownTracker,

    timeout_committer: Mutex<Option<(JoinHandle<()>, Arc<AtomicBool>)>>,
}

impl Engine {
    /// Open (creating if necessary) an engine instance rooted at `data_dir`.
    pub fn open(data_dir: &Path, config: EngineConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)?;
        let info_path = data_dir.join("info");

        let volatile = Arc::new(VolatileBlockStore::new());
        let aux_block_index = Arc::new(AuxiliaryBlockIndex::new());
        let idle = Arc::new(IdleDetector::new());

        let chunk_index = Arc::new(ChunkIndex::new(Arc::new(DiskHashIndex::open(
            &data_dir.join("chunk-index.data"),
            &data_dir.join("chunk-index.txn"),
            config.chunk_disk_hash.clone(),
        )?)));

        let promotion = Arc::new(BlockPromotionConsumer::new(volatile.clone(), aux_block_index.clone()));

        let mut registry = ConsumerRegistry::new();
        registry.register(promotion.clone() as Arc<dyn LogConsumer>);
        registry.register(chunk_index.clone() as Arc<dyn LogConsumer>);

        let log = Arc::new(OperationLog::open(data_dir.join("log"), registry, None)?);

        let starting_id = InfoFile::read(&info_path)?
            .map(|info| info.next_container_id)
            .unwrap_or(LEAST_VALID_CONTAINER_ID);
        let id_generator = Arc::new(ContainerIdGenerator::new(starting_id));

        let allocator_backend = Arc::new(RedbIndex::open(&data_dir.join("allocator.redb"))?);
        let allocator = Arc::new(FileSetAllocator::open(
            allocator_backend,
            config.storage.file_count,
            config.storage.slots_per_file,
            config.storage.container_size,
        )?);
        let metadata_backend = Arc::new(RedbIndex::open(&data_dir.join("metadata-index.redb"))?);
        let metadata_index = Arc::new(MetadataIndex::new(metadata_backend));

        let storage = Arc::new(ContainerStorage::open(
            &data_dir.join("containers"),
            config.storage.clone(),
            allocator,
            metadata_index,
            id_generator.clone(),
            log.clone(),
        )?);

        let persistent_block_index = Arc::new(PersistentBlockIndex::new(Arc::new(RedbIndex::open(
            &data_dir.join("block-index.redb"),
        )?)));
        let failed_block_index = Arc::new(FailedBlockIndex::new(Arc::new(RedbIndex::open(
            &data_dir.join("failed-block-index.redb"),
        )?)));
        let container_tracker = Arc::new(ContainerTracker::new(Arc::new(RedbIndex::open(
            &data_dir.join("container-tracker.redb"),
        )?)));

        let importer = Arc::new(BackgroundImporter::new(
            config.importer,
            aux_block_index.clone(),
            persistent_block_index.clone(),
            failed_block_index,
        ));

        let timeout_committer = Mutex::new(Some(storage.spawn_timeout_committer(idle.clone())));

        Ok(Arc::new(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            info_path,
            storage,
            chunk_index,
            volatile,
            aux_block_index,
            persistent_block_index,
            importer,
            container_tracker,
            promotion,
            id_generator,
            log,
            block_locks: BlockLocks::new(DEFAULT_LOCK_SHARD_COUNT),
            chunk_locks: ChunkLocks::new(DEFAULT_LOCK_SHARD_COUNT),
            idle,
            shutdown_tracker: ShutdownTracker::new(),
            timeout_committer,
        }))
    }

    /// The configured block size.
    pub fn block_size(&self) -> u32 {
        self.config.block_size
    }

    /// The idle-detection registry, for background workers to subscribe to.
    pub fn idle_detector(&self) -> &IdleDetector {
        &self.idle
    }

    fn current_mapping(&self, block_id: BlockId) -> Result<Option<BlockMapping>> {
        if let Some(mapping) = self.aux_block_index.lookup(block_id) {
            return Ok(Some(mapping));
        }
        self.persistent_block_index.lookup(block_id)
    }

    /// Resolve a block's current mapping, defaulting to the empty-data
    /// initial mapping for a block that's never been written.
    pub fn read_block_mapping(&self, block_id: BlockId) -> Result<BlockMapping> {
        let _guard = self.block_locks.read(&block_id);
        Ok(self
            .current_mapping(block_id)?
            .unwrap_or_else(|| BlockMapping::initial(block_id, self.config.block_size)))
    }

    /// Reconstruct a block's full contents by reading every chunk its
    /// mapping references.
    pub fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>> {
        let mapping = self.read_block_mapping(block_id)?;
        let mut out = Vec::with_capacity(mapping.covered_size() as usize);
        for item in &mapping.items {
            if item.fp.is_empty_data() {
                out.resize(out.len() + item.size as usize, 0);
                continue;
            }
            let mut chunk_buf = Vec::new();
            self.storage.read_item(item.data_address, &item.fp, None, &mut chunk_buf)?;
            out.extend_from_slice(&chunk_buf);
        }
        Ok(out)
    }

    /// Write a block as an ordered sequence of `(fingerprint, data)` chunks
    /// covering it end to end (spec §2's data path; chunking/hashing
    /// themselves happen upstream of the engine).
    ///
    /// New chunks are written through the container storage and recorded in
    /// the chunk index; chunks the index already has are deduplicated by
    /// reference. The resulting mapping is logged and handed to the
    /// volatile block store, which promotes it to the auxiliary block index
    /// once every container it references has committed.
    pub fn write_block(&self, block_id: BlockId, chunks: &[(Fingerprint, Vec<u8>)]) -> Result<()> {
        self.idle.mark_busy();
        let _block_guard = self.block_locks.write(&block_id);
        let previous = self.current_mapping(block_id)?;

        let mut items = Vec::with_capacity(chunks.len());
        let mut written_fps = Vec::new();
        let write_result: Result<()> = (|| {
            for (fp, data) in chunks {
                if fp.is_empty_data() {
                    items.push(BlockMappingItem::empty_data(data.len() as u32));
                    continue;
                }
                let _chunk_guard = self.chunk_locks.write(fp);
                let data_address = match self.chunk_index.lookup(fp)? {
                    Some(existing) => existing.data_address,
                    None => {
                        let container_id = self.storage.write_chunk(fp.clone(), data, true, None)?;
                        self.chunk_index
                            .record_write(fp.clone(), container_id, None, Some(block_id))?;
                        written_fps.push(fp.clone());
                        container_id
                    }
                };
                items.push(BlockMappingItem {
                    fp: fp.clone(),
                    data_address,
                    chunk_offset: 0,
                    size: data.len() as u32,
                });
            }
            Ok(())
        })();

        if let Err(e) = write_result {
            if !written_fps.is_empty() {
                self.log.append(EventPayload::OrphanChunks { fingerprints: written_fps })?;
            }
            return Err(e);
        }

        let next_version = previous.as_ref().map(|m| m.version + 1).unwrap_or(0);
        let modified = BlockMapping {
            block_id,
            version: next_version,
            event_log_id: None,
            items,
        };
        if !modified.validate_coverage(self.config.block_size) {
            return Err(Error::Internal(format!(
                "block {block_id} write does not cover the configured block size"
            )));
        }

        let pair = BlockMappingPair {
            block_id,
            previous_mapping: previous.clone(),
            modified_mapping: modified.clone(),
        };
        let log_id = self.log.append(EventPayload::BlockMappingWritten(pair))?;

        let mut modified = modified;
        modified.event_log_id = Some(log_id);

        // Visible to reads the instant it's logged; becoming eligible for
        // import into the persistent index is a separate, later step gated
        // on every referenced container actually committing (see
        // `BlockPromotionConsumer`).
        self.aux_block_index.store_block(modified.clone());

        let mut open_container_ids = Vec::new();
        for container_id in modified.referenced_containers() {
            if self.storage.lookup_container_address(container_id)?.is_none() {
                open_container_ids.push(container_id);
            }
        }

        let (entry_key, ready) = self.volatile.add_block(
            block_id.0,
            previous,
            modified,
            &open_container_ids,
            Some(log_id),
        );

        if ready {
            self.promotion.promote_cascade(vec![entry_key]);
        }

        Ok(())
    }

    /// Run one batch of the background block-index importer.
    pub fn run_importer_batch(&self) -> Result<usize> {
        self.importer.run_batch()
    }

    /// Record that a container's chunks have been imported into the chunk
    /// index's container tracker, so a restart skips re-scanning it.
    pub fn mark_container_imported(&self, id: dedupfs_core::ContainerId) -> Result<()> {
        self.container_tracker.mark_imported(id)
    }

    /// Graceful shutdown (spec §5, SPEC_FULL.md §11): stop ingress, drain
    /// the write cache, drain the importer's ready queue, flush the chunk
    /// index, persist the allocator, and close the log. Each stage is
    /// recorded in [`ShutdownTracker`] so a failure partway through leaves a
    /// diagnosable trail.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tracker.advance(ShutdownStage::IngressStopped);

        self.storage.drain_write_cache()?;
        self.shutdown_tracker.advance(ShutdownStage::WriteCacheDrained);

        loop {
            if self.aux_block_index.is_empty() {
                break;
            }
            if self.importer.run_batch()? == 0 {
                break;
            }
        }
        self.shutdown_tracker.advance(ShutdownStage::ReadyQueueDrained);

        loop {
            if self.chunk_index.dirty_count() == 0 {
                break;
            }
            if self.chunk_index.try_persist_dirty_item(4096)? == 0 {
                break;
            }
        }
        self.shutdown_tracker.advance(ShutdownStage::ChunkIndexFlushed);

        // The allocator was already persisted as part of draining the write
        // cache; this stage marks the sequencing point spec §5 names.
        self.shutdown_tracker.advance(ShutdownStage::AllocatorPersisted);

        InfoFile {
            next_container_id: self.id_generator.peek(),
        }
        .write(&self.info_path)?;
        self.log.close()?;
        self.shutdown_tracker.advance(ShutdownStage::LogClosed);

        if let Some((handle, stop)) = self.timeout_committer.lock().take() {
            stop.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }

        Ok(())
    }

    /// How far a shutdown has progressed, if one was started.
    pub fn shutdown_stage(&self) -> ShutdownStage {
        self.shutdown_tracker.stage()
    }

    /// Root directory this engine instance was opened against.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
