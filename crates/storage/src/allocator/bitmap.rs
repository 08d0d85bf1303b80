//! Bitmap allocator (spec §4.4): tracks which container slots in each
//! container file are occupied.
//!
//! Page persistence is lazy — a set bit lives in memory until log replay
//! (direct or dirty) forces the owning page to disk via
//! [`Bitmap::ensure_page_persisted`]. That mirrors the log-driven nature of
//! the original design: the allocator never has to fsync on the
//! allocation hot path, only when an event proves the allocation durable.

use super::file_set::OS_PAGE_SIZE;
use crate::kv::KvIndex;
use dedupfs_core::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// In-memory + KV-index-backed occupancy bitmap for one container file.
pub struct Bitmap {
    bits: Mutex<Vec<u8>>,
    dirty_pages: Mutex<std::collections::HashSet<u64>>,
    persistent: Arc<dyn KvIndex>,
    file_index: u32,
    last_free_pos: Mutex<u64>,
    slot_count: u64,
}

fn page_key(file_index: u32, page: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&file_index.to_le_bytes());
    key.extend_from_slice(&page.to_le_bytes());
    key
}

impl Bitmap {
    /// Bits packed per on-disk page, at one bit per slot.
    const BITS_PER_PAGE: u64 = OS_PAGE_SIZE as u64 * 8;

    /// Load (or initialize) a bitmap for `file_index` holding `slot_count`
    /// container slots, backed by `persistent`.
    pub fn open(persistent: Arc<dyn KvIndex>, file_index: u32, slot_count: u64) -> Result<Self> {
        let byte_len = (slot_count as usize + 7) / 8;
        let mut bits = vec![0u8; byte_len];

        let page_count = (slot_count + Self::BITS_PER_PAGE - 1) / Self::BITS_PER_PAGE;
        for page in 0..page_count {
            let key = page_key(file_index, page);
            if let crate::kv::LookupResult::Found(value) = persistent.lookup(&key)? {
                let start = (page * OS_PAGE_SIZE as u64) as usize;
                let end = (start + OS_PAGE_SIZE).min(bits.len());
                let copy_len = end.saturating_sub(start).min(value.len());
                bits[start..start + copy_len].copy_from_slice(&value[..copy_len]);
            }
        }

        Ok(Self {
            bits: Mutex::new(bits),
            dirty_pages: Mutex::new(std::collections::HashSet::new()),
            persistent,
            file_index,
            last_free_pos: Mutex::new(0),
            slot_count,
        })
    }

    fn set_bit(&self, slot: u64, used: bool) {
        let mut bits = self.bits.lock();
        let byte = (slot / 8) as usize;
        let bit = (slot % 8) as u8;
        if used {
            bits[byte] |= 1 << bit;
        } else {
            bits[byte] &= !(1 << bit);
        }
        drop(bits);
        self.dirty_pages
            .lock()
            .insert(slot / Self::BITS_PER_PAGE);
    }

    fn is_used(&self, slot: u64) -> bool {
        let bits = self.bits.lock();
        let byte = (slot / 8) as usize;
        let bit = (slot % 8) as u8;
        bits[byte] & (1 << bit) != 0
    }

    /// Allocate a free slot, scanning linearly from `last_free_pos_`
    /// (wrapping once). `reserve_one_free` keeps one slot back for a future
    /// fresh container, unless this allocation is itself for a merge/delete
    /// rewrite (where the caller passes `false` to avoid deadlocking a
    /// near-full disk).
    pub fn allocate(&self, reserve_one_free: bool) -> Result<u64> {
        let start = *self.last_free_pos.lock();
        let scan_limit = if reserve_one_free {
            self.slot_count.saturating_sub(1)
        } else {
            self.slot_count
        };

        for offset in 0..self.slot_count {
            let slot = (start + offset) % self.slot_count;
            if offset >= scan_limit {
                break;
            }
            if !self.is_used(slot) {
                self.set_bit(slot, true);
                *self.last_free_pos.lock() = (slot + 1) % self.slot_count;
                return Ok(slot);
            }
        }
        Err(Error::Full(format!(
            "container file {} has no free slots",
            self.file_index
        )))
    }

    /// Mark a slot free again (delete, merge-source, move-source).
    pub fn free(&self, slot: u64) {
        self.set_bit(slot, false);
    }

    /// Mark a slot used without going through [`Self::allocate`] — used
    /// when dirty replay reconstructs the bitmap from logged events.
    pub fn mark_used(&self, slot: u64) {
        self.set_bit(slot, true);
    }

    /// Flush every page touched since the last call to disk.
    pub fn ensure_page_persisted(&self) -> Result<()> {
        let pages: Vec<u64> = self.dirty_pages.lock().drain().collect();
        let bits = self.bits.lock();
        for page in pages {
            let start = (page * OS_PAGE_SIZE as u64) as usize;
            let end = (start + OS_PAGE_SIZE).min(bits.len());
            if start >= bits.len() {
                continue;
            }
            let key = page_key(self.file_index, page);
            self.persistent.put(&key, &bits[start..end])?;
        }
        Ok(())
    }

    /// Count of slots currently marked used.
    pub fn used_count(&self) -> u64 {
        self.bits
            .lock()
            .iter()
            .map(|byte| byte.count_ones() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::RedbIndex;
    use tempfile::tempdir;

    fn bitmap(slot_count: u64) -> (tempfile::TempDir, Bitmap) {
        let dir = tempdir().unwrap();
        let persistent = Arc::new(RedbIndex::open(&dir.path().join("bitmap.redb")).unwrap());
        let bitmap = Bitmap::open(persistent, 0, slot_count).unwrap();
        (dir, bitmap)
    }

    #[test]
    fn allocate_returns_distinct_slots() {
        let (_dir, bitmap) = bitmap(16);
        let a = bitmap.allocate(false).unwrap();
        let b = bitmap.allocate(false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn freed_slot_is_reused() {
        let (_dir, bitmap) = bitmap(4);
        let a = bitmap.allocate(false).unwrap();
        bitmap.free(a);
        let reused = bitmap.allocate(false).unwrap();
        assert_eq!(a, reused);
    }

    #[test]
    fn reserve_one_free_refuses_last_slot() {
        let (_dir, bitmap) = bitmap(2);
        bitmap.allocate(true).unwrap();
        let err = bitmap.allocate(true).unwrap_err();
        assert!(matches!(err, Error::Full(_)));
        // but a merge/delete rewrite may still use it
        assert!(bitmap.allocate(false).is_ok());
    }

    #[test]
    fn persisted_pages_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("bitmap.redb");
        let slot = {
            let persistent = Arc::new(RedbIndex::open(&db_path).unwrap());
            let bitmap = Bitmap::open(persistent, 0, 16).unwrap();
            let slot = bitmap.allocate(false).unwrap();
            bitmap.ensure_page_persisted().unwrap();
            slot
        };
        let persistent = Arc::new(RedbIndex::open(&db_path).unwrap());
        let reopened = Bitmap::open(persistent, 0, 16).unwrap();
        assert!(reopened.is_used(slot));
    }
}
