//! Metadata index: the persistent `container_id -> address` map (spec §3).

use crate::kv::{KvIndex, LookupResult};
use dedupfs_core::{ContainerAddress, ContainerId, Error, Result};
use std::sync::Arc;

fn encode_key(id: ContainerId) -> [u8; 8] {
    id.raw().to_le_bytes()
}

fn encode_value(address: ContainerAddress) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&address.file_index.to_le_bytes());
    buf[4..12].copy_from_slice(&address.file_offset.to_le_bytes());
    buf
}

fn decode_value(bytes: &[u8]) -> Result<ContainerAddress> {
    if bytes.len() != 12 {
        return Err(Error::Corruption("malformed metadata index value".into()));
    }
    let file_index = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let file_offset = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
    Ok(ContainerAddress {
        file_index,
        file_offset,
    })
}

/// Persistent `container_id -> address` map, with secondary-id resolution:
/// a merged-away id's entry points at the same address as its surviving
/// primary, so lookups never need a second index.
pub struct MetadataIndex {
    backend: Arc<dyn KvIndex>,
}

impl MetadataIndex {
    /// Wrap a backend (normally a [`crate::kv::RedbIndex`]).
    pub fn new(backend: Arc<dyn KvIndex>) -> Self {
        Self { backend }
    }

    /// Resolve `id` (primary or secondary) to its current on-disk address.
    pub fn lookup(&self, id: ContainerId) -> Result<Option<ContainerAddress>> {
        match self.backend.lookup(&encode_key(id))? {
            LookupResult::Found(bytes) => Ok(Some(decode_value(&bytes)?)),
            LookupResult::NotFound => Ok(None),
        }
    }

    /// Record (or overwrite) where `id` lives.
    pub fn put(&self, id: ContainerId, address: ContainerAddress) -> Result<()> {
        self.backend.put(&encode_key(id), &encode_value(address))?;
        Ok(())
    }

    /// Point every id in `ids` (primary and all secondaries) at `address` —
    /// used after a merge, so both original ids resolve to the new one.
    pub fn repoint_all(&self, ids: &[ContainerId], address: ContainerAddress) -> Result<()> {
        for &id in ids {
            self.put(id, address)?;
        }
        Ok(())
    }

    /// Remove an id's entry (container deleted).
    pub fn remove(&self, id: ContainerId) -> Result<()> {
        self.backend.delete(&encode_key(id))?;
        Ok(())
    }

    /// Number of tracked ids.
    pub fn item_count(&self) -> u64 {
        self.backend.item_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::RedbIndex;
    use tempfile::tempdir;

    #[test]
    fn put_then_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbIndex::open(&dir.path().join("meta.redb")).unwrap());
        let index = MetadataIndex::new(backend);
        let id = ContainerId::from_raw(5);
        let addr = ContainerAddress::new(0, 3 * 4096, 4096);
        index.put(id, addr).unwrap();
        assert_eq!(index.lookup(id).unwrap(), Some(addr));
    }

    #[test]
    fn repoint_all_resolves_secondary_ids_to_new_address() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbIndex::open(&dir.path().join("meta.redb")).unwrap());
        let index = MetadataIndex::new(backend);
        let a = ContainerId::from_raw(2);
        let b = ContainerId::from_raw(5);
        let merged_addr = ContainerAddress::new(1, 4096, 4096);
        index.repoint_all(&[a, b], merged_addr).unwrap();
        assert_eq!(index.lookup(a).unwrap(), Some(merged_addr));
        assert_eq!(index.lookup(b).unwrap(), Some(merged_addr));
    }
}
