//! Container storage orchestration (spec §4.3): write path, commit path
//! (background + timeout committers), read path, merge/delete/move.
//!
//! Locking hierarchy respected here (spec §5): read-cache-line lock →
//! write-cache slot lock → container-lock → metadata-index lock →
//! allocator file lock → log append lock. Callers outside this module
//! (chunk/block index) must acquire their own locks *before* calling in.

use crate::allocator::FileSetAllocator;
use crate::cache::{OpenContainer, ReadCache, WriteCache};
use crate::container::Container;
use crate::metadata_index::MetadataIndex;
use crate::superblock::Superblock;
use dedupfs_core::limits::{
    DEFAULT_CONTAINER_SIZE, DEFAULT_CONTAINER_TIMEOUT_SECONDS, DEFAULT_LOCK_SHARD_COUNT,
    DEFAULT_READ_CACHE_SLOTS, DEFAULT_WRITE_CONTAINER_COUNT,
};
use dedupfs_concurrency::IdleDetector;
use dedupfs_core::{Compressor, ContainerAddress, ContainerId, ContainerIdGenerator, Error, Fingerprint, Result};
use dedupfs_durability::{EventPayload, OperationLog};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Tuning knobs for a [`ContainerStorage`] instance.
#[derive(Debug, Clone)]
pub struct ContainerStorageConfig {
    /// Bytes per container, including the metadata area.
    pub container_size: u64,
    /// Number of concurrently open write-cache containers.
    pub write_container_count: usize,
    /// Container-sized slots held by the read cache.
    pub read_cache_slots: usize,
    /// How long an open container may sit before the timeout committer
    /// forces its commit.
    pub timeout: Duration,
    /// Number of container files.
    pub file_count: u32,
    /// Container slots per file.
    pub slots_per_file: u64,
}

impl Default for ContainerStorageConfig {
    fn default() -> Self {
        Self {
            container_size: DEFAULT_CONTAINER_SIZE,
            write_container_count: DEFAULT_WRITE_CONTAINER_COUNT,
            read_cache_slots: DEFAULT_READ_CACHE_SLOTS,
            timeout: Duration::from_secs(DEFAULT_CONTAINER_TIMEOUT_SECONDS),
            file_count: 1,
            slots_per_file: 1024,
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct ContainerFile {
    file: Mutex<std::fs::File>,
}

impl ContainerFile {
    fn open_or_create(path: &Path, file_index: u32, container_size: u64, slots: u64) -> Result<Self> {
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if is_new {
            let mut f = file.try_clone()?;
            let superblock_size = dedupfs_core::limits::SUPERBLOCK_SIZE as u64;
            let total_size = superblock_size + container_size * slots;
            f.set_len(total_size)?;
            let sb = Superblock::new(Uuid::new_v4(), file_index, total_size, now_unix());
            sb.write_to(&mut f)?;
            f.sync_all()?;
        }
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn data_offset(&self, file_offset: u64) -> u64 {
        dedupfs_core::limits::SUPERBLOCK_SIZE as u64 + file_offset
    }
}

/// The data layer: fixed-size containers, write cache, timeout commit,
/// merge/delete, bitmap allocator, read cache (spec §4.3).
pub struct ContainerStorage {
    config: ContainerStorageConfig,
    files: Vec<ContainerFile>,
    allocator: Arc<FileSetAllocator>,
    metadata_index: Arc<MetadataIndex>,
    read_cache: ReadCache,
    write_cache: WriteCache,
    id_generator: Arc<ContainerIdGenerator>,
    log: Arc<OperationLog>,
    container_locks: Vec<Mutex<()>>,
    shutting_down: AtomicBool,
}

impl ContainerStorage {
    /// Open (creating if necessary) container files under `data_dir`.
    pub fn open(
        data_dir: &Path,
        config: ContainerStorageConfig,
        allocator: Arc<FileSetAllocator>,
        metadata_index: Arc<MetadataIndex>,
        id_generator: Arc<ContainerIdGenerator>,
        log: Arc<OperationLog>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let mut files = Vec::with_capacity(config.file_count as usize);
        for file_index in 0..config.file_count {
            let path = data_dir.join(format!("container-file-{file_index}"));
            files.push(ContainerFile::open_or_create(
                &path,
                file_index,
                config.container_size,
                config.slots_per_file,
            )?);
        }

        let mut container_locks = Vec::with_capacity(DEFAULT_LOCK_SHARD_COUNT);
        for _ in 0..DEFAULT_LOCK_SHARD_COUNT {
            container_locks.push(Mutex::new(()));
        }

        Ok(Self {
            read_cache: ReadCache::new(config.read_cache_slots),
            write_cache: WriteCache::new(config.write_container_count),
            files,
            allocator,
            metadata_index,
            id_generator,
            log,
            container_locks,
            config,
            shutting_down: AtomicBool::new(false),
        })
    }

    fn lock_index(&self, id: ContainerId) -> usize {
        (id.raw() as usize) % self.container_locks.len()
    }

    fn open_new_container(&self, for_rewrite: bool) -> Result<OpenContainer> {
        let id = self.id_generator.next();
        let address = self.allocator.allocate(for_rewrite)?;
        self.log
            .append(EventPayload::ContainerOpened { id, address })?;
        Ok(OpenContainer {
            container: Container::new(id, self.config.container_size),
            address,
            opened_at: Instant::now(),
        })
    }

    /// Write path step 1-2: append a chunk to the currently open
    /// round-robin write-cache slot, opening one if needed and rolling
    /// over to a fresh container (committing the full one) if it doesn't
    /// fit. Returns the id of the container the chunk now lives in.
    pub fn write_chunk(
        &self,
        fp: Fingerprint,
        data: &[u8],
        indexed: bool,
        compressor: Option<&dyn Compressor>,
    ) -> Result<ContainerId> {
        let slot_index = self.write_cache.next_slot_index();
        let slot = self.write_cache.slot(slot_index);
        let mut guard = slot.lock();

        if guard.is_none() {
            *guard = Some(self.open_new_container(false)?);
        }

        let open = guard.as_mut().unwrap();
        match open.container.add_item(fp.clone(), data, indexed, compressor) {
            Ok(()) => Ok(open.container.primary_id()),
            Err(Error::Full(_)) => {
                let full = guard.take().unwrap();
                *guard = Some(self.open_new_container(false)?);
                let open = guard.as_mut().unwrap();
                open.container.add_item(fp, data, indexed, compressor)?;
                let id = open.container.primary_id();
                drop(guard);
                self.commit_open_container(full)?;
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Commit path (spec §4.3): serialize to disk under O_SYNC-equivalent
    /// fsync, update the metadata index, emit the event, and refresh the
    /// read cache.
    pub fn commit_open_container(&self, open: OpenContainer) -> Result<()> {
        let id = open.container.primary_id();
        let address = open.address;
        let _guard = self.container_locks[self.lock_index(id)].lock();

        let mut container = open.container;
        let active_data_size = container.active_data_size();
        let item_count = container.live_item_count();

        let write_result = {
            let file = &self.files[address.file_index as usize];
            let offset = file.data_offset(address.file_offset);
            let mut f = file.file.lock();
            container
                .store_to_file(&mut *f, offset, now_unix())
                .and_then(|()| f.sync_all().map_err(Error::Io))
        };

        match write_result {
            Ok(()) => {
                self.metadata_index.put(id, address)?;
                self.log.append(EventPayload::ContainerCommitted {
                    id,
                    address,
                    active_data_size,
                    item_count,
                })?;
                self.read_cache.insert(id, Arc::new(container));
                Ok(())
            }
            Err(e) => {
                self.allocator.free(address);
                self.log
                    .append(EventPayload::ContainerCommitFailed { id })?;
                Err(e)
            }
        }
    }

    /// Timeout committer sweep: force-commit every open container whose
    /// slot has been open longer than `config.timeout`.
    pub fn commit_timed_out_containers(&self) -> Result<usize> {
        let mut committed = 0;
        for slot_index in self.write_cache.timed_out_slots(self.config.timeout) {
            let slot = self.write_cache.slot(slot_index);
            let taken = slot.lock().take();
            if let Some(open) = taken {
                self.commit_open_container(open)?;
                committed += 1;
            }
        }
        Ok(committed)
    }

    /// Consecutive no-op timeout-committer polls before the foreground
    /// request path is considered idle.
    const IDLE_AFTER_QUIET_POLLS: u32 = 3;

    /// Spawn the dedicated timeout-committer thread (spec §4.3, §5). Also
    /// the concrete detector of "foreground path has gone quiet" for `idle`
    /// (SPEC_FULL.md §11): a poll that force-commits nothing several times
    /// in a row means nothing new has been written in a while.
    /// Returns a handle plus an [`Arc<AtomicBool>`] the caller should set to
    /// signal shutdown.
    pub fn spawn_timeout_committer(self: &Arc<Self>, idle: Arc<IdleDetector>) -> (JoinHandle<()>, Arc<AtomicBool>) {
        let stop = Arc::new(AtomicBool::new(false));
        let storage = Arc::clone(self);
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut quiet_polls = 0u32;
            while !stop_for_thread.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(250).min(storage.config.timeout));
                match storage.commit_timed_out_containers() {
                    Ok(0) => {
                        quiet_polls += 1;
                        if quiet_polls >= Self::IDLE_AFTER_QUIET_POLLS {
                            idle.mark_idle();
                        }
                    }
                    Ok(_) => {
                        quiet_polls = 0;
                        idle.mark_busy();
                    }
                    Err(e) => {
                        tracing::error!("timeout committer: {e}");
                    }
                }
            }
        });
        (handle, stop)
    }

    /// Read path (spec §4.3): resolve `id` to its current address (through
    /// secondary-id indirection), fetch the container via the read cache or
    /// from disk on miss, then copy out the requested item's payload.
    pub fn read_item(
        &self,
        id: ContainerId,
        fp: &Fingerprint,
        compressor: Option<&dyn Compressor>,
        dst: &mut Vec<u8>,
    ) -> Result<()> {
        if let Some(cached) = self.read_cache.get(id) {
            let item = cached
                .find_item(fp, false)
                .ok_or_else(|| Error::NotFound(format!("item {fp} not in container {id}")))?;
            return cached.copy_raw_data(item, compressor, dst);
        }

        let address = self
            .metadata_index
            .lookup(id)?
            .ok_or_else(|| Error::NotFound(format!("container {id} not in metadata index")))?;

        let _guard = self.container_locks[self.lock_index(id)].lock();
        let file = &self.files[address.file_index as usize];
        let offset = file.data_offset(address.file_offset);
        let container = {
            let mut f = file.file.lock();
            Container::load_from_file(&mut *f, offset, self.config.container_size, true, id)?
        };

        let item = container
            .find_item(fp, false)
            .ok_or_else(|| Error::NotFound(format!("item {fp} not in container {id}")))?;
        container.copy_raw_data(item, compressor, dst)?;
        self.read_cache.insert(id, Arc::new(container));
        Ok(())
    }

    /// Resolve `id` (primary or secondary) to its current on-disk address.
    pub fn lookup_container_address(&self, id: ContainerId) -> Result<Option<ContainerAddress>> {
        self.metadata_index.lookup(id)
    }

    fn load_committed(&self, id: ContainerId) -> Result<(Container, ContainerAddress)> {
        let address = self
            .metadata_index
            .lookup(id)?
            .ok_or_else(|| Error::NotFound(format!("container {id} not in metadata index")))?;
        let file = &self.files[address.file_index as usize];
        let offset = file.data_offset(address.file_offset);
        let mut f = file.file.lock();
        let container =
            Container::load_from_file(&mut *f, offset, self.config.container_size, true, id)?;
        Ok((container, address))
    }

    /// Merge two committed containers (spec §4.3 `TryMergeContainer`):
    /// locks are acquired in id order to avoid deadlock, both read from
    /// disk/cache, merged in memory, written at a freshly allocated
    /// address, and the metadata index is repointed before the old
    /// addresses are freed.
    pub fn try_merge_container(&self, id_a: ContainerId, id_b: ContainerId) -> Result<ContainerId> {
        let (first, second) = if id_a <= id_b { (id_a, id_b) } else { (id_b, id_a) };
        let _guard_first = self.container_locks[self.lock_index(first)].lock();
        let _guard_second = self.container_locks[self.lock_index(second)].lock();

        let (container_a, address_a) = self.load_committed(first)?;
        let (container_b, address_b) = self.load_committed(second)?;

        let mut merged = Container::merge(&container_a, &container_b, self.config.container_size)?;
        let new_address = self.allocator.allocate(true)?;
        let new_id = merged.primary_id();

        {
            let file = &self.files[new_address.file_index as usize];
            let offset = file.data_offset(new_address.file_offset);
            let mut f = file.file.lock();
            merged.store_to_file(&mut *f, offset, now_unix())?;
            f.sync_all()?;
        }

        self.metadata_index
            .repoint_all(&[first, second], new_address)?;
        self.log.append(EventPayload::ContainerMerged {
            a: first,
            b: second,
            new: new_id,
        })?;

        self.read_cache.invalidate(first);
        self.read_cache.invalidate(second);
        self.read_cache.insert(new_id, Arc::new(merged));

        self.allocator.free(address_a);
        self.allocator.free(address_b);
        Ok(new_id)
    }

    /// Delete an empty committed container, freeing its address.
    pub fn delete_container(&self, id: ContainerId) -> Result<()> {
        let _guard = self.container_locks[self.lock_index(id)].lock();
        let (container, address) = self.load_committed(id)?;
        if container.live_item_count() != 0 {
            return Err(Error::Internal(format!(
                "container {id} is not empty; cannot delete"
            )));
        }
        self.metadata_index.remove(id)?;
        self.log
            .append(EventPayload::ContainerDeleted { id })?;
        self.read_cache.invalidate(id);
        self.allocator.free(address);
        Ok(())
    }

    /// Rewrite a committed container at a freshly allocated address
    /// (used by garbage collection to defragment a file nearing capacity).
    pub fn move_container(&self, id: ContainerId) -> Result<ContainerId> {
        let _guard = self.container_locks[self.lock_index(id)].lock();
        let (mut container, old_address) = self.load_committed(id)?;
        let new_address = self.allocator.allocate(true)?;

        {
            let file = &self.files[new_address.file_index as usize];
            let offset = file.data_offset(new_address.file_offset);
            let mut f = file.file.lock();
            container.store_to_file(&mut *f, offset, now_unix())?;
            f.sync_all()?;
        }

        self.metadata_index.put(id, new_address)?;
        self.log.append(EventPayload::ContainerMoved { old: id, new: id })?;
        self.read_cache.invalidate(id);
        self.read_cache.insert(id, Arc::new(container));
        self.allocator.free(old_address);
        Ok(id)
    }

    /// Graceful shutdown's "drain write cache" step: force-commit every
    /// still-open container.
    pub fn drain_write_cache(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        for open in self.write_cache.drain() {
            self.commit_open_container(open)?;
        }
        self.allocator.ensure_persisted()?;
        Ok(())
    }
}
