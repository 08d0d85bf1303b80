//! Container tracker: the persistent set of container ids the chunk index
//! has already imported (spec §4.5), so a restart doesn't re-walk every
//! committed container to rebuild chunk-index state it already has.

use dedupfs_core::{ContainerId, Result};
use dedupfs_storage::kv::KvIndex;
use std::sync::Arc;

fn encode_key(id: ContainerId) -> [u8; 8] {
    id.raw().to_le_bytes()
}

/// Persistent `container_id` membership set.
pub struct ContainerTracker<I: KvIndex> {
    backend: Arc<I>,
}

impl<I: KvIndex> ContainerTracker<I> {
    /// Wrap a backend.
    pub fn new(backend: Arc<I>) -> Self {
        Self { backend }
    }

    /// Record that `id`'s chunks have been imported into the chunk index.
    pub fn mark_imported(&self, id: ContainerId) -> Result<()> {
        self.backend.put(&encode_key(id), &[])?;
        Ok(())
    }

    /// True if `id` has already been imported.
    pub fn is_imported(&self, id: ContainerId) -> Result<bool> {
        Ok(self.backend.lookup(&encode_key(id))?.is_found())
    }

    /// Number of tracked containers.
    pub fn len(&self) -> u64 {
        self.backend.item_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_storage::kv::RedbIndex;
    use tempfile::tempdir;

    #[test]
    fn unmarked_container_is_not_imported() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbIndex::open(&dir.path().join("tracker.redb")).unwrap());
        let tracker = ContainerTracker::new(backend);
        assert!(!tracker.is_imported(ContainerId::from_raw(5)).unwrap());
    }

    #[test]
    fn marked_container_is_imported() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(RedbIndex::open(&dir.path().join("tracker.redb")).unwrap());
        let tracker = ContainerTracker::new(backend);
        let id = ContainerId::from_raw(5);
        tracker.mark_imported(id).unwrap();
        assert!(tracker.is_imported(id).unwrap());
    }
}
