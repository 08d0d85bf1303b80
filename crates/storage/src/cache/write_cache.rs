//! Write cache: a fixed number of concurrently open containers, selected
//! round-robin (spec §4.3).

use crate::container::Container;
use dedupfs_core::{ContainerAddress, ContainerId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// A container currently open for writes, plus the address reserved for it.
pub struct OpenContainer {
    /// The container accepting new items.
    pub container: Container,
    /// The address it will be committed to.
    pub address: ContainerAddress,
    /// When this slot was opened — drives the timeout committer.
    pub opened_at: Instant,
}

/// Fixed-size pool of open-container slots.
pub struct WriteCache {
    slots: Vec<Mutex<Option<OpenContainer>>>,
    next_slot: AtomicUsize,
}

impl WriteCache {
    /// Build an empty write cache with `slot_count` slots.
    pub fn new(slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count.max(1));
        for _ in 0..slot_count.max(1) {
            slots.push(Mutex::new(None));
        }
        Self {
            slots,
            next_slot: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Pick the next slot, round-robin.
    pub fn next_slot_index(&self) -> usize {
        self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len()
    }

    /// Exclusive access to a slot's contents.
    pub fn slot(&self, index: usize) -> &Mutex<Option<OpenContainer>> {
        &self.slots[index]
    }

    /// Every slot currently open and past `timeout`, paired with its index —
    /// consumed by the timeout committer (spec §4.3, §5).
    pub fn timed_out_slots(&self, timeout: std::time::Duration) -> Vec<usize> {
        let now = Instant::now();
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let guard = slot.lock();
                guard
                    .as_ref()
                    .filter(|open| now.duration_since(open.opened_at) >= timeout)
                    .map(|_| idx)
            })
            .collect()
    }

    /// Take every open container out of the cache — used for graceful
    /// shutdown's "drain write cache" step.
    pub fn drain(&self) -> Vec<OpenContainer> {
        self.slots
            .iter()
            .filter_map(|slot| slot.lock().take())
            .collect()
    }

    /// Find the slot currently holding `id`, if any.
    pub fn find_slot_for(&self, id: ContainerId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.lock()
                .as_ref()
                .map(|open| open.container.matches_id(id))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_core::limits::DEFAULT_CONTAINER_SIZE;

    #[test]
    fn round_robin_cycles_through_slots() {
        let cache = WriteCache::new(3);
        let indices: Vec<usize> = (0..6).map(|_| cache.next_slot_index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn drain_empties_all_slots() {
        let cache = WriteCache::new(2);
        *cache.slot(0).lock() = Some(OpenContainer {
            container: Container::new(ContainerId::from_raw(2), DEFAULT_CONTAINER_SIZE),
            address: ContainerAddress::new(0, 0, DEFAULT_CONTAINER_SIZE),
            opened_at: Instant::now(),
        });
        let drained = cache.drain();
        assert_eq!(drained.len(), 1);
        assert!(cache.slot(0).lock().is_none());
    }
}
