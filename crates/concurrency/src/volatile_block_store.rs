//! The volatile block store (spec §4.6.1): a dependency-tracking graph of
//! block mappings that have been written to containers but not yet promoted
//! to the persistent block index.
//!
//! Promotion has to happen in two orders at once: per-block, mappings must
//! promote in the order they were written (an older version can never
//! overtake a newer one into the persistent index), and per-container, a
//! mapping can't promote until every container it references has committed.
//! `open_predecessor_count` tracks the first constraint, `open_container_count`
//! the second; an entry is commit-ready exactly when both reach zero.
//!
//! Per spec §9's note on cyclic/graph structures, entries live in a flat
//! arena keyed by `(block_id, entry_seq)` rather than linking through
//! `Rc`/raw pointers; predecessor/successor relationships are expressed as
//! keys into that arena.

use dashmap::DashMap;
use dedupfs_core::{BlockMapping, ContainerId, LogId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable handle to an uncommitted block mapping. Remains valid until the
/// entry is committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    block_id: u64,
    seq: u64,
}

/// A block mapping that has been written but not yet promoted to the
/// persistent block index (spec §3, §4.6.1).
pub struct UncommittedBlockEntry {
    /// The mapping this write replaces, if any (used to compute usage-count
    /// deltas once the entry commits).
    pub original_mapping: Option<BlockMapping>,
    /// The mapping being written.
    pub modified_mapping: BlockMapping,
    /// Number of containers referenced by `modified_mapping` that have not
    /// yet committed.
    open_container_count: usize,
    /// Number of older uncommitted entries for the same block that must
    /// commit first.
    open_predecessor_count: usize,
    /// Entries that list this one as their predecessor.
    successor_list: Vec<EntryKey>,
    /// Log record id of the `BlockMappingWritten` event for this entry, once
    /// it has been appended.
    pub block_mapping_written_event_log_id: Option<LogId>,
}

impl UncommittedBlockEntry {
    /// True once both dependency counts have reached zero.
    pub fn is_commit_ready(&self) -> bool {
        self.open_container_count == 0 && self.open_predecessor_count == 0
    }

    /// Containers still blocking this entry's promotion.
    pub fn open_container_count(&self) -> usize {
        self.open_container_count
    }

    /// Older same-block entries still blocking this entry's promotion.
    pub fn open_predecessor_count(&self) -> usize {
        self.open_predecessor_count
    }
}

#[derive(Default)]
struct BlockQueue {
    order: VecDeque<EntryKey>,
}

/// The volatile block store itself.
pub struct VolatileBlockStore {
    arena: DashMap<EntryKey, UncommittedBlockEntry>,
    per_block: DashMap<u64, BlockQueue>,
    per_container: DashMap<ContainerId, Vec<EntryKey>>,
    next_seq: AtomicU64,
}

impl Default for VolatileBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VolatileBlockStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self {
            arena: DashMap::new(),
            per_block: DashMap::new(),
            per_container: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a newly written block mapping.
    ///
    /// `open_container_ids` are the containers `modified_mapping` references
    /// that have not yet committed; the caller (which tracks container
    /// commit state) is responsible for supplying an accurate set.
    ///
    /// Returns the new entry's key and whether it is immediately
    /// commit-ready (no open containers and no pending predecessor of the
    /// same block).
    pub fn add_block(
        &self,
        block_id: u64,
        original_mapping: Option<BlockMapping>,
        modified_mapping: BlockMapping,
        open_container_ids: &[ContainerId],
        log_id: Option<LogId>,
    ) -> (EntryKey, bool) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let key = EntryKey { block_id, seq };

        let mut predecessor_key = None;
        {
            let mut queue = self.per_block.entry(block_id).or_default();
            if let Some(&tail) = queue.order.back() {
                predecessor_key = Some(tail);
            }
            queue.order.push_back(key);
        }

        if let Some(pred) = predecessor_key {
            if let Some(mut pred_entry) = self.arena.get_mut(&pred) {
                pred_entry.successor_list.push(key);
            }
        }

        for &container_id in open_container_ids {
            self.per_container.entry(container_id).or_default().push(key);
        }

        let entry = UncommittedBlockEntry {
            original_mapping,
            modified_mapping,
            open_container_count: open_container_ids.len(),
            open_predecessor_count: if predecessor_key.is_some() { 1 } else { 0 },
            successor_list: Vec::new(),
            block_mapping_written_event_log_id: log_id,
        };
        let ready = entry.is_commit_ready();
        self.arena.insert(key, entry);
        (key, ready)
    }

    /// Notify the store that `container_id` has committed. Returns the keys
    /// of entries that became commit-ready as a result (their
    /// `open_container_count` reached zero and they have no pending
    /// predecessor).
    pub fn container_committed(&self, container_id: ContainerId) -> Vec<EntryKey> {
        let waiting = match self.per_container.remove(&container_id) {
            Some((_, keys)) => keys,
            None => return Vec::new(),
        };

        let mut ready = Vec::new();
        for key in waiting {
            if let Some(mut entry) = self.arena.get_mut(&key) {
                if entry.open_container_count > 0 {
                    entry.open_container_count -= 1;
                }
                if entry.is_commit_ready() {
                    ready.push(key);
                }
            }
        }
        ready
    }

    /// Finalize a commit-ready entry: remove it from the store and cascade
    /// the predecessor-count decrement to its successors.
    ///
    /// Returns the removed entry (for the caller to promote into the
    /// persistent index) plus the keys of successors newly unblocked by this
    /// commit.
    pub fn commit(&self, key: EntryKey) -> Option<(UncommittedBlockEntry, Vec<EntryKey>)> {
        let (_, entry) = self.arena.remove(&key)?;
        debug_assert!(entry.is_commit_ready(), "commit() called on a non-ready entry");
        tracing::trace!(block_id = key.block_id, seq = key.seq, "promoting uncommitted block entry");

        if let Some(mut queue) = self.per_block.get_mut(&key.block_id) {
            if queue.order.front() == Some(&key) {
                queue.order.pop_front();
            } else if let Some(pos) = queue.order.iter().position(|k| *k == key) {
                queue.order.remove(pos);
            }
        }

        let mut newly_ready = Vec::new();
        for successor in &entry.successor_list {
            if let Some(mut succ_entry) = self.arena.get_mut(successor) {
                if succ_entry.open_predecessor_count > 0 {
                    succ_entry.open_predecessor_count -= 1;
                }
                if succ_entry.is_commit_ready() {
                    newly_ready.push(*successor);
                }
            }
        }
        Some((entry, newly_ready))
    }

    /// Abort an uncommitted entry without promoting it (e.g. the write that
    /// produced it failed before `BlockMappingWritten` was durable).
    ///
    /// Successors inherit whatever predecessor relationship the aborted
    /// entry had: if the aborted entry had already cleared its own
    /// predecessor count, its successors are unblocked by one step too.
    pub fn abort(&self, key: EntryKey) -> Vec<EntryKey> {
        let entry = match self.arena.remove(&key) {
            Some((_, entry)) => entry,
            None => return Vec::new(),
        };

        if let Some(mut queue) = self.per_block.get_mut(&key.block_id) {
            if let Some(pos) = queue.order.iter().position(|k| *k == key) {
                queue.order.remove(pos);
            }
        }
        // A stale key may remain in `per_container` for a container this
        // entry was waiting on; `container_committed` skips it harmlessly
        // since `arena.get_mut` will miss.

        let mut newly_ready = Vec::new();
        if entry.open_predecessor_count == 0 {
            for successor in &entry.successor_list {
                if let Some(mut succ_entry) = self.arena.get_mut(successor) {
                    if succ_entry.open_predecessor_count > 0 {
                        succ_entry.open_predecessor_count -= 1;
                    }
                    if succ_entry.is_commit_ready() {
                        newly_ready.push(*successor);
                    }
                }
            }
        }
        newly_ready
    }

    /// Abort every entry still waiting on `container_id` (spec §4.6.1's
    /// `Abort(container_id)`): that container's commit failed, so none of
    /// them can ever become ready, regardless of what else they were
    /// waiting on. Returns the keys of same-block successors this unblocks
    /// (already filtered to ones that are themselves fully commit-ready).
    pub fn abort_container(&self, container_id: ContainerId) -> Vec<EntryKey> {
        let waiting = match self.per_container.remove(&container_id) {
            Some((_, keys)) => keys,
            None => return Vec::new(),
        };

        let mut newly_ready = Vec::new();
        for key in waiting {
            newly_ready.extend(self.abort(key));
        }
        newly_ready
    }

    /// Number of entries still awaiting promotion.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True if there are no pending entries.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_core::{BlockId, BlockMapping};

    fn mapping(block_id: u64) -> BlockMapping {
        BlockMapping::initial(BlockId(block_id), 4096)
    }

    #[test]
    fn entry_with_no_dependencies_is_immediately_ready() {
        let store = VolatileBlockStore::new();
        let (_key, ready) = store.add_block(1, None, mapping(1), &[], None);
        assert!(ready);
    }

    #[test]
    fn second_write_to_same_block_waits_on_first() {
        let store = VolatileBlockStore::new();
        let (first, ready1) = store.add_block(1, None, mapping(1), &[], None);
        assert!(ready1);
        let (second, ready2) = store.add_block(1, None, mapping(1), &[], None);
        assert!(!ready2);

        let (_, unblocked) = store.commit(first).unwrap();
        assert_eq!(unblocked, vec![second]);
    }

    #[test]
    fn container_commit_unblocks_entry() {
        let store = VolatileBlockStore::new();
        let container = ContainerId::from_raw(7);
        let (key, ready) = store.add_block(1, None, mapping(1), &[container], None);
        assert!(!ready);

        let newly_ready = store.container_committed(container);
        assert_eq!(newly_ready, vec![key]);
    }

    #[test]
    fn entry_needs_both_predecessor_and_container_cleared() {
        let store = VolatileBlockStore::new();
        let container = ContainerId::from_raw(3);
        let (first, _) = store.add_block(1, None, mapping(1), &[], None);
        let (second, ready) = store.add_block(1, None, mapping(1), &[container], None);
        assert!(!ready);

        // Container commits first; still blocked on the predecessor.
        let after_container = store.container_committed(container);
        assert!(after_container.is_empty());

        let (_, unblocked) = store.commit(first).unwrap();
        assert_eq!(unblocked, vec![second]);
    }

    #[test]
    fn abort_with_cleared_predecessor_unblocks_successor() {
        let store = VolatileBlockStore::new();
        let (first, _) = store.add_block(1, None, mapping(1), &[], None);
        let (second, ready) = store.add_block(1, None, mapping(1), &[], None);
        assert!(!ready);

        let unblocked = store.abort(first);
        assert_eq!(unblocked, vec![second]);
    }

    #[test]
    fn abort_container_drains_every_entry_waiting_on_it() {
        let store = VolatileBlockStore::new();
        let container = ContainerId::from_raw(9);
        let (first, ready1) = store.add_block(1, None, mapping(1), &[container], None);
        let (second, ready2) = store.add_block(2, None, mapping(2), &[container], None);
        assert!(!ready1 && !ready2);

        let unblocked = store.abort_container(container);
        assert!(unblocked.is_empty());
        assert!(store.is_empty());
        // Both entries are gone; a later commit attempt finds nothing.
        assert!(store.commit(first).is_none());
        assert!(store.commit(second).is_none());
    }

    #[test]
    fn abort_container_unblocks_a_successor_with_no_other_dependency() {
        let store = VolatileBlockStore::new();
        let container = ContainerId::from_raw(10);
        let (_first, _) = store.add_block(1, None, mapping(1), &[container], None);
        let (second, ready) = store.add_block(1, None, mapping(1), &[], None);
        assert!(!ready);

        let unblocked = store.abort_container(container);
        assert_eq!(unblocked, vec![second]);
    }
}
