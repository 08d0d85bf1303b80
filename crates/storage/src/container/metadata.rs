//! Container metadata area: everything that precedes the packed item data.

use dedupfs_core::{ContainerId, Fingerprint};
use serde::{Deserialize, Serialize};

/// Per-item descriptor stored in the metadata area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Chunk fingerprint.
    pub fp: Fingerprint,
    /// Byte offset of the item's payload within the data area.
    pub offset: u32,
    /// Uncompressed payload size.
    pub raw_size: u32,
    /// On-disk (possibly compressed) payload size.
    pub on_disk_size: u32,
    /// Compression kind tag; `0` means stored raw.
    pub compression_kind: u8,
    /// Container id this item originally belonged to, before any merge.
    pub original_id: ContainerId,
    /// Tombstoned: logically removed but not yet compacted away.
    pub deleted: bool,
    /// Participates in the chunk index (vs. stored for raw retrieval only).
    pub indexed: bool,
}

impl ItemDescriptor {
    /// Size in bytes this item contributes to `active_data_size` while live.
    pub fn active_size(&self) -> u64 {
        if self.deleted {
            0
        } else {
            self.on_disk_size as u64
        }
    }
}

/// The parsed contents of a container's metadata area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// This container's current lifetime id.
    pub primary_id: ContainerId,
    /// Ids absorbed into this container through merges.
    pub secondary_ids: Vec<ContainerId>,
    /// Unix timestamp of the commit that produced this on-disk image.
    pub commit_timestamp: u64,
    /// Adler-32 checksum over the data area, computed at store time.
    pub checksum: u32,
    /// Item descriptors, kept sorted by fingerprint.
    pub items: Vec<ItemDescriptor>,
}

impl ContainerMetadata {
    /// A fresh, empty metadata block for a newly opened container.
    pub fn new(primary_id: ContainerId) -> Self {
        Self {
            primary_id,
            secondary_ids: Vec::new(),
            commit_timestamp: 0,
            checksum: 0,
            items: Vec::new(),
        }
    }

    /// Whether `id` names this container, directly or through a merge.
    pub fn matches_id(&self, id: ContainerId) -> bool {
        self.primary_id == id || self.secondary_ids.contains(&id)
    }

    fn insertion_point(&self, fp: &Fingerprint) -> usize {
        self.items
            .binary_search_by(|item| item.fp.as_bytes().cmp(fp.as_bytes()))
            .unwrap_or_else(|insert_at| insert_at)
    }

    /// Binary search by fingerprint; `include_deleted` controls whether a
    /// tombstoned item is returned.
    pub fn find(&self, fp: &Fingerprint, include_deleted: bool) -> Option<&ItemDescriptor> {
        let idx = self
            .items
            .binary_search_by(|item| item.fp.as_bytes().cmp(fp.as_bytes()))
            .ok()?;
        let item = &self.items[idx];
        if item.deleted && !include_deleted {
            None
        } else {
            Some(item)
        }
    }

    /// Insert `item`, keeping the vector sorted by fingerprint.
    pub fn insert_sorted(&mut self, item: ItemDescriptor) {
        let at = self.insertion_point(&item.fp);
        self.items.insert(at, item);
    }

    /// Sum of `active_size()` across all items, plus the metadata area size.
    pub fn active_data_size(&self, metadata_area_size: u64) -> u64 {
        metadata_area_size + self.items.iter().map(ItemDescriptor::active_size).sum::<u64>()
    }

    /// Count of non-deleted items.
    pub fn live_item_count(&self) -> u32 {
        self.items.iter().filter(|item| !item.deleted).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::new(vec![byte; 4]).unwrap()
    }

    fn descriptor(fp_byte: u8) -> ItemDescriptor {
        ItemDescriptor {
            fp: fp(fp_byte),
            offset: 0,
            raw_size: 10,
            on_disk_size: 10,
            compression_kind: 0,
            original_id: ContainerId::from_raw(2),
            deleted: false,
            indexed: true,
        }
    }

    #[test]
    fn insert_sorted_keeps_fingerprint_order() {
        let mut meta = ContainerMetadata::new(ContainerId::from_raw(2));
        meta.insert_sorted(descriptor(5));
        meta.insert_sorted(descriptor(1));
        meta.insert_sorted(descriptor(9));
        let order: Vec<u8> = meta.items.iter().map(|i| i.fp.as_bytes()[0]).collect();
        assert_eq!(order, vec![1, 5, 9]);
    }

    #[test]
    fn find_skips_deleted_unless_requested() {
        let mut meta = ContainerMetadata::new(ContainerId::from_raw(2));
        let mut item = descriptor(3);
        item.deleted = true;
        meta.insert_sorted(item);
        assert!(meta.find(&fp(3), false).is_none());
        assert!(meta.find(&fp(3), true).is_some());
    }
}
