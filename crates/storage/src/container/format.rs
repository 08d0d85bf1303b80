//! `Container`: the in-memory representation of one on-disk container slot.

use super::metadata::{ContainerMetadata, ItemDescriptor};
use dedupfs_core::limits::{CONTAINER_METADATA_SIZE, DEFAULT_CONTAINER_SIZE, MIN_COMPRESSED_CHUNK_SIZE};
use dedupfs_core::{Compressor, ContainerId, Error, Fingerprint, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// A fixed-size container: a metadata area followed by packed item payloads.
///
/// Grounded on the teacher's segment/record split (header area vs. payload
/// bytes) but reshaped around spec §4.2's container layout: the metadata
/// area is msgpack, not the teacher's own framing.
#[derive(Debug, Clone)]
pub struct Container {
    metadata: ContainerMetadata,
    container_size: u64,
    data: Vec<u8>,
    data_used: u32,
}

impl Container {
    /// Maximum bytes available for item payloads in a container of
    /// `container_size` total bytes.
    pub fn data_capacity(container_size: u64) -> u32 {
        (container_size - CONTAINER_METADATA_SIZE as u64) as u32
    }

    /// A fresh, empty container ready to accept items.
    pub fn new(primary_id: ContainerId, container_size: u64) -> Self {
        Self {
            metadata: ContainerMetadata::new(primary_id),
            container_size,
            data: Vec::new(),
            data_used: 0,
        }
    }

    /// This container's current primary id.
    pub fn primary_id(&self) -> ContainerId {
        self.metadata.primary_id
    }

    /// Ids (besides the primary) this container answers to after merges.
    pub fn secondary_ids(&self) -> &[ContainerId] {
        &self.metadata.secondary_ids
    }

    /// Whether `id` names this container.
    pub fn matches_id(&self, id: ContainerId) -> bool {
        self.metadata.matches_id(id)
    }

    /// Bytes of the container currently "active" (metadata plus live items).
    pub fn active_data_size(&self) -> u64 {
        self.metadata.active_data_size(CONTAINER_METADATA_SIZE as u64)
    }

    /// Number of non-deleted items.
    pub fn live_item_count(&self) -> u32 {
        self.metadata.live_item_count()
    }

    /// Total items, deleted or not.
    pub fn item_count(&self) -> usize {
        self.metadata.items.len()
    }

    /// Append a new chunk. Compression is attempted only when `raw_data` is
    /// at least [`MIN_COMPRESSED_CHUNK_SIZE`]; if the compressed form isn't
    /// smaller, the raw bytes are stored instead.
    pub fn add_item(
        &mut self,
        fp: Fingerprint,
        raw_data: &[u8],
        indexed: bool,
        compressor: Option<&dyn Compressor>,
    ) -> Result<()> {
        if self.metadata.find(&fp, true).is_some() {
            return Err(Error::AlreadyExists(format!(
                "item {fp} already present in container {}",
                self.metadata.primary_id
            )));
        }

        let (payload, compression_kind) = match compressor {
            Some(c) if raw_data.len() >= MIN_COMPRESSED_CHUNK_SIZE => {
                match c.compress(raw_data) {
                    Some(compressed) if compressed.len() < raw_data.len() => {
                        (compressed, c.kind())
                    }
                    _ => (raw_data.to_vec(), 0),
                }
            }
            _ => (raw_data.to_vec(), 0),
        };

        let capacity = Self::data_capacity(self.container_size);
        let needed = self.data_used as u64 + payload.len() as u64;
        if needed > capacity as u64 {
            return Err(Error::Full(format!(
                "container {} full: {needed} bytes needed, {capacity} available",
                self.metadata.primary_id
            )));
        }

        let offset = self.data_used;
        self.data.extend_from_slice(&payload);
        self.data_used += payload.len() as u32;

        self.metadata.insert_sorted(ItemDescriptor {
            fp,
            offset,
            raw_size: raw_data.len() as u32,
            on_disk_size: payload.len() as u32,
            compression_kind,
            original_id: self.metadata.primary_id,
            deleted: false,
            indexed,
        });
        Ok(())
    }

    /// Binary search for an item by fingerprint.
    pub fn find_item(&self, fp: &Fingerprint, include_deleted: bool) -> Option<&ItemDescriptor> {
        self.metadata.find(fp, include_deleted)
    }

    /// Decompress (if needed) and copy an item's payload into `dst`.
    pub fn copy_raw_data(
        &self,
        item: &ItemDescriptor,
        compressor: Option<&dyn Compressor>,
        dst: &mut Vec<u8>,
    ) -> Result<()> {
        let capacity = Self::data_capacity(self.container_size);
        if item.offset >= capacity || item.offset as u64 + item.on_disk_size as u64 > capacity as u64
        {
            return Err(Error::Corruption(format!(
                "item offset {} (+{} bytes) out of range for container {}",
                item.offset, item.on_disk_size, self.metadata.primary_id
            )));
        }
        let start = item.offset as usize;
        let end = start + item.on_disk_size as usize;
        let slice = self
            .data
            .get(start..end)
            .ok_or_else(|| Error::Corruption("item payload truncated".into()))?;

        if item.compression_kind == 0 {
            dst.extend_from_slice(slice);
        } else {
            let c = compressor.ok_or_else(|| {
                Error::Configuration("item is compressed but no compressor was supplied".into())
            })?;
            dst.extend_from_slice(&c.decompress(slice, item.raw_size as usize));
        }
        Ok(())
    }

    /// Tombstone an item. No space is reclaimed until the container is
    /// merged into a fresh address.
    pub fn delete_item(&mut self, fp: &Fingerprint) -> Result<()> {
        let item = self
            .metadata
            .items
            .iter_mut()
            .find(|item| &item.fp == fp && !item.deleted)
            .ok_or_else(|| Error::NotFound(format!("item {fp} not present")))?;
        item.deleted = true;
        Ok(())
    }

    /// Build a fresh container holding the non-deleted items of `a` and `b`.
    /// The primary id is the smaller of the two originals; the other
    /// becomes a secondary id (along with any secondary ids it already had).
    pub fn merge(a: &Container, b: &Container, container_size: u64) -> Result<Container> {
        let (primary, secondary) = if a.metadata.primary_id <= b.metadata.primary_id {
            (a, b)
        } else {
            (b, a)
        };

        let mut merged = Container::new(primary.metadata.primary_id, container_size);
        merged.metadata.secondary_ids = primary.metadata.secondary_ids.clone();
        merged.metadata.secondary_ids.push(secondary.metadata.primary_id);
        merged
            .metadata
            .secondary_ids
            .extend(secondary.metadata.secondary_ids.iter().copied());
        merged.metadata.secondary_ids.sort();
        merged.metadata.secondary_ids.dedup();

        for source in [primary, secondary] {
            for item in source.metadata.items.iter().filter(|i| !i.deleted) {
                let start = item.offset as usize;
                let end = start + item.on_disk_size as usize;
                let payload = source
                    .data
                    .get(start..end)
                    .ok_or_else(|| Error::Corruption("item payload truncated during merge".into()))?;
                let offset = merged.data_used;
                merged.data.extend_from_slice(payload);
                merged.data_used += payload.len() as u32;
                merged.metadata.insert_sorted(ItemDescriptor {
                    fp: item.fp.clone(),
                    offset,
                    raw_size: item.raw_size,
                    on_disk_size: item.on_disk_size,
                    compression_kind: item.compression_kind,
                    original_id: item.original_id,
                    deleted: false,
                    indexed: item.indexed,
                });
            }
        }
        Ok(merged)
    }

    /// Serialize and write exactly `container_size` bytes at `offset`.
    pub fn store_to_file<F: Write + Seek>(
        &mut self,
        file: &mut F,
        offset: u64,
        commit_timestamp: u64,
    ) -> Result<()> {
        self.metadata.commit_timestamp = commit_timestamp;
        self.metadata.checksum = adler::adler32_slice(&self.data[..self.data_used as usize]);

        let metadata_bytes = rmp_serde::to_vec(&self.metadata)
            .map_err(|e| Error::Internal(format!("container metadata encode failed: {e}")))?;
        if metadata_bytes.len() + 4 > CONTAINER_METADATA_SIZE {
            return Err(Error::Internal(format!(
                "container {} metadata ({} bytes) exceeds metadata area",
                self.metadata.primary_id,
                metadata_bytes.len()
            )));
        }

        let mut buf = vec![0u8; self.container_size as usize];
        buf[0..4].copy_from_slice(&(metadata_bytes.len() as u32).to_le_bytes());
        buf[4..4 + metadata_bytes.len()].copy_from_slice(&metadata_bytes);

        let data_start = CONTAINER_METADATA_SIZE;
        let data_end = data_start + self.data_used as usize;
        buf[data_start..data_end].copy_from_slice(&self.data[..self.data_used as usize]);

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Read and parse a full container from `offset`; optionally re-verify
    /// the Adler-32 checksum and every item's in-range invariant.
    ///
    /// `expected_id` (primary or secondary) must match the loaded metadata,
    /// guarding against a stale or misdirected read.
    pub fn load_from_file<F: Read + Seek>(
        file: &mut F,
        offset: u64,
        container_size: u64,
        verify_checksum: bool,
        expected_id: ContainerId,
    ) -> Result<Container> {
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; container_size as usize];
        file.read_exact(&mut buf)?;

        let metadata_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if metadata_len + 4 > CONTAINER_METADATA_SIZE {
            return Err(Error::Corruption(format!(
                "container metadata length {metadata_len} exceeds metadata area"
            )));
        }
        let metadata: ContainerMetadata = rmp_serde::from_slice(&buf[4..4 + metadata_len])
            .map_err(|e| Error::Corruption(format!("container metadata decode failed: {e}")))?;

        if !metadata.matches_id(expected_id) {
            return Err(Error::Corruption(format!(
                "container id mismatch: expected {expected_id}, loaded primary {} (secondary {:?})",
                metadata.primary_id, metadata.secondary_ids
            )));
        }

        let capacity = Self::data_capacity(container_size);
        let data_start = CONTAINER_METADATA_SIZE;
        let data = buf[data_start..].to_vec();

        let mut data_used = 0u32;
        for item in &metadata.items {
            if item.offset >= capacity
                || item.offset as u64 + item.on_disk_size as u64 > capacity as u64
            {
                return Err(Error::Corruption(format!(
                    "item {} offset {} out of range", item.fp, item.offset
                )));
            }
            data_used = data_used.max(item.offset + item.on_disk_size);
        }

        if verify_checksum {
            let computed = adler::adler32_slice(&data[..data_used as usize]);
            if computed != metadata.checksum {
                return Err(Error::Corruption(format!(
                    "container {} checksum mismatch: expected {:#x}, computed {:#x}",
                    metadata.primary_id, metadata.checksum, computed
                )));
            }
        }

        Ok(Container {
            metadata,
            container_size,
            data,
            data_used,
        })
    }
}
