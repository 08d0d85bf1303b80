//! Round-robin allocator across a fixed set of container files (spec §4.4).

use super::bitmap::Bitmap;
use crate::kv::KvIndex;
use dedupfs_core::{ContainerAddress, Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Typical OS page size; the allocator persists one bitmap page at a time
/// at this granularity.
pub const OS_PAGE_SIZE: usize = 4096;

/// Allocates container addresses across `file_count` container files, one
/// [`Bitmap`] per file, advancing round-robin so consecutive containers
/// tend to land in different files.
pub struct FileSetAllocator {
    bitmaps: Vec<Bitmap>,
    container_size: u64,
    next_file: AtomicUsize,
}

impl FileSetAllocator {
    /// Build an allocator over `file_count` files, each holding
    /// `slots_per_file` container-sized slots, backed by `persistent`.
    pub fn open(
        persistent: Arc<dyn KvIndex>,
        file_count: u32,
        slots_per_file: u64,
        container_size: u64,
    ) -> Result<Self> {
        let mut bitmaps = Vec::with_capacity(file_count as usize);
        for file_index in 0..file_count {
            bitmaps.push(Bitmap::open(persistent.clone(), file_index, slots_per_file)?);
        }
        Ok(Self {
            bitmaps,
            container_size,
            next_file: AtomicUsize::new(0),
        })
    }

    /// Allocate a fresh container address, trying files in round-robin
    /// order starting from the file after the last one used.
    ///
    /// `for_rewrite` should be `true` for merge/delete/move allocations,
    /// which are permitted to use a file's last reserved-free slot.
    pub fn allocate(&self, for_rewrite: bool) -> Result<ContainerAddress> {
        let file_count = self.bitmaps.len();
        if file_count == 0 {
            return Err(Error::Configuration("no container files configured".into()));
        }
        let start = self.next_file.fetch_add(1, Ordering::SeqCst) % file_count;
        for offset in 0..file_count {
            let file_index = (start + offset) % file_count;
            match self.bitmaps[file_index].allocate(!for_rewrite) {
                Ok(slot) => {
                    return Ok(ContainerAddress::new(
                        file_index as u32,
                        slot * self.container_size,
                        self.container_size,
                    ))
                }
                Err(Error::Full(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Full("all container files full".into()))
    }

    /// Free a previously allocated address.
    pub fn free(&self, address: ContainerAddress) {
        let slot = address.slot(self.container_size);
        if let Some(bitmap) = self.bitmaps.get(address.file_index as usize) {
            bitmap.free(slot);
        }
    }

    /// Mark an address as used, bypassing the allocator's own selection —
    /// used during dirty replay to reconstruct state from logged events.
    pub fn mark_used(&self, address: ContainerAddress) {
        let slot = address.slot(self.container_size);
        if let Some(bitmap) = self.bitmaps.get(address.file_index as usize) {
            bitmap.mark_used(slot);
        }
    }

    /// Flush every file's dirty bitmap pages to the persistent backend.
    pub fn ensure_persisted(&self) -> Result<()> {
        for bitmap in &self.bitmaps {
            bitmap.ensure_page_persisted()?;
        }
        Ok(())
    }

    /// Total slots currently marked used, across all files.
    pub fn used_count(&self) -> u64 {
        self.bitmaps.iter().map(Bitmap::used_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::RedbIndex;
    use tempfile::tempdir;

    fn allocator(file_count: u32, slots_per_file: u64) -> (tempfile::TempDir, FileSetAllocator) {
        let dir = tempdir().unwrap();
        let persistent = Arc::new(RedbIndex::open(&dir.path().join("alloc.redb")).unwrap());
        let allocator =
            FileSetAllocator::open(persistent, file_count, slots_per_file, 4096).unwrap();
        (dir, allocator)
    }

    #[test]
    fn round_robin_spreads_across_files() {
        let (_dir, allocator) = allocator(2, 8);
        let a = allocator.allocate(false).unwrap();
        let b = allocator.allocate(false).unwrap();
        assert_ne!(a.file_index, b.file_index);
    }

    #[test]
    fn free_then_allocate_reuses_slot() {
        let (_dir, allocator) = allocator(1, 4);
        let a = allocator.allocate(false).unwrap();
        allocator.free(a);
        let b = allocator.allocate(false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhausted_files_return_full_error() {
        let (_dir, allocator) = allocator(1, 1);
        allocator.allocate(false).unwrap();
        let err = allocator.allocate(false).unwrap_err();
        assert!(matches!(err, Error::Full(_)));
    }
}
