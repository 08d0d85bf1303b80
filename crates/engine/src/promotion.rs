//! Bridges container-commit events to the volatile block store and the
//! auxiliary block index (spec §4.6.1): registered as a log consumer ahead
//! of time so it sees every `ContainerCommitted`/`ContainerCommitFailed`
//! record as it's appended, not just on the next explicit poll.
//!
//! The mapping itself reaches [`AuxiliaryBlockIndex`] the instant it's
//! written (`Engine::write_block` calls `store_block` unconditionally, for
//! read visibility); this consumer only ever decides when a mapping is
//! *eligible to be imported* into the persistent index, by queuing it once
//! every container it references has committed.

use dedupfs_concurrency::VolatileBlockStore;
use dedupfs_durability::{EventPayload, LogConsumer, LogReplayContext, LogRecord, ReplayMode};

use crate::block_index::AuxiliaryBlockIndex;
use std::sync::Arc;

/// Drains commit-ready entries out of the volatile block store, queuing
/// each for import, and aborts entries whose container commit failed.
pub struct BlockPromotionConsumer {
    volatile: Arc<VolatileBlockStore>,
    aux: Arc<AuxiliaryBlockIndex>,
}

impl BlockPromotionConsumer {
    /// Build a consumer over the shared volatile store and auxiliary index.
    pub fn new(volatile: Arc<VolatileBlockStore>, aux: Arc<AuxiliaryBlockIndex>) -> Self {
        Self { volatile, aux }
    }

    /// Commit `key` and cascade to any successor it unblocks, queuing each
    /// commit-ready mapping for import as it's resolved.
    pub fn promote_cascade(&self, start: Vec<dedupfs_concurrency::EntryKey>) {
        let mut queue = start;
        while let Some(key) = queue.pop() {
            if let Some((entry, successors)) = self.volatile.commit(key) {
                self.aux.queue_for_import(entry.modified_mapping);
                queue.extend(successors);
            }
        }
    }
}

impl LogConsumer for BlockPromotionConsumer {
    fn name(&self) -> &str {
        "block-promotion"
    }

    fn replay_modes(&self) -> &[ReplayMode] {
        &[ReplayMode::Direct, ReplayMode::DirtyStart]
    }

    fn consume(&self, record: &LogRecord, _ctx: LogReplayContext) {
        match &record.payload {
            EventPayload::ContainerCommitted { id, .. } => {
                let ready = self.volatile.container_committed(*id);
                self.promote_cascade(ready);
            }
            EventPayload::ContainerCommitFailed { id } => {
                // Every entry waiting on this container can never become
                // commit-ready; aborting may in turn unblock same-block
                // successors whose own dependencies are already clear.
                let unblocked = self.volatile.abort_container(*id);
                self.promote_cascade(unblocked);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_core::{BlockId, BlockMapping, ContainerAddress, ContainerId, LogId};

    fn mapping(block_id: u64) -> BlockMapping {
        BlockMapping::initial(BlockId(block_id), 4096)
    }

    #[test]
    fn container_committed_queues_ready_entry_for_import() {
        let volatile = Arc::new(VolatileBlockStore::new());
        let aux = Arc::new(AuxiliaryBlockIndex::new());
        let consumer = BlockPromotionConsumer::new(volatile.clone(), aux.clone());

        let container = ContainerId::from_raw(1);
        volatile.add_block(1, None, mapping(1), &[container], None);

        let record = LogRecord::new(
            LogId(1),
            EventPayload::ContainerCommitted {
                id: container,
                address: ContainerAddress::new(0, 0, 4096),
                active_data_size: 0,
                item_count: 0,
            },
        );
        consumer.consume(&record, LogReplayContext::new(ReplayMode::Direct));

        assert_eq!(aux.take_batch(10).len(), 1);
    }

    #[test]
    fn container_commit_failed_aborts_waiting_entries() {
        let volatile = Arc::new(VolatileBlockStore::new());
        let aux = Arc::new(AuxiliaryBlockIndex::new());
        let consumer = BlockPromotionConsumer::new(volatile.clone(), aux.clone());

        let container = ContainerId::from_raw(2);
        volatile.add_block(1, None, mapping(1), &[container], None);

        let record = LogRecord::new(LogId(1), EventPayload::ContainerCommitFailed { id: container });
        consumer.consume(&record, LogReplayContext::new(ReplayMode::Direct));

        assert!(volatile.is_empty());
        assert!(aux.take_batch(10).is_empty());
    }

    #[test]
    fn container_commit_failed_unblocks_a_waiting_successor() {
        let volatile = Arc::new(VolatileBlockStore::new());
        let aux = Arc::new(AuxiliaryBlockIndex::new());
        let consumer = BlockPromotionConsumer::new(volatile.clone(), aux.clone());

        let container = ContainerId::from_raw(3);
        let (_first, _) = volatile.add_block(1, None, mapping(1), &[container], None);
        let (_second, ready) = volatile.add_block(1, None, mapping(1), &[], None);
        assert!(!ready);

        let record = LogRecord::new(LogId(1), EventPayload::ContainerCommitFailed { id: container });
        consumer.consume(&record, LogReplayContext::new(ReplayMode::Direct));

        // The first entry was aborted; the second had no other dependency
        // left and should have been queued for import.
        assert!(volatile.is_empty());
        assert_eq!(aux.take_batch(10).len(), 1);
    }
}
