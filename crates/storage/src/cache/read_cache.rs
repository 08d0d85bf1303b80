//! Read cache: LRU over a fixed number of container-sized slots (spec §4.3).

use dedupfs_core::ContainerId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::container::Container;

struct Inner {
    slots: HashMap<ContainerId, Arc<Container>>,
    recency: VecDeque<ContainerId>,
    capacity: usize,
}

/// Thread-safe LRU cache of decoded containers, keyed by primary id.
///
/// Acquiring a cache-line's worth of state is covered by the single inner
/// mutex; callers needing to avoid holding it across a disk read should
/// check [`Self::get`] for a miss, perform the read themselves, then call
/// [`Self::insert`] — mirroring spec §4.3's "acquire slot lock, read on
/// miss, write back, release" read-path description.
pub struct ReadCache {
    inner: Mutex<Inner>,
}

impl ReadCache {
    /// Build a cache holding at most `capacity` containers.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                recency: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Look up a cached container, marking it most-recently-used on hit.
    pub fn get(&self, id: ContainerId) -> Option<Arc<Container>> {
        let mut inner = self.inner.lock();
        let hit = inner.slots.get(&id).cloned();
        if hit.is_some() {
            inner.recency.retain(|&x| x != id);
            inner.recency.push_back(id);
        }
        hit
    }

    /// Insert a freshly loaded container, evicting the least-recently-used
    /// entry if the cache is full.
    pub fn insert(&self, id: ContainerId, container: Arc<Container>) {
        let mut inner = self.inner.lock();
        if !inner.slots.contains_key(&id) && inner.slots.len() >= inner.capacity {
            if let Some(victim) = inner.recency.pop_front() {
                inner.slots.remove(&victim);
            }
        }
        inner.recency.retain(|&x| x != id);
        inner.recency.push_back(id);
        inner.slots.insert(id, container);
    }

    /// Drop a cached entry — used when a container is merged, deleted, or
    /// moved and its old address becomes stale.
    pub fn invalidate(&self, id: ContainerId) {
        let mut inner = self.inner.lock();
        inner.slots.remove(&id);
        inner.recency.retain(|&x| x != id);
    }

    /// Number of containers currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupfs_core::limits::DEFAULT_CONTAINER_SIZE;

    fn container(id: u64) -> Arc<Container> {
        Arc::new(Container::new(
            ContainerId::from_raw(id),
            DEFAULT_CONTAINER_SIZE,
        ))
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = ReadCache::new(2);
        cache.insert(ContainerId::from_raw(2), container(2));
        cache.insert(ContainerId::from_raw(3), container(3));
        cache.get(ContainerId::from_raw(2));
        cache.insert(ContainerId::from_raw(4), container(4));

        assert!(cache.get(ContainerId::from_raw(2)).is_some());
        assert!(cache.get(ContainerId::from_raw(3)).is_none());
        assert!(cache.get(ContainerId::from_raw(4)).is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ReadCache::new(4);
        cache.insert(ContainerId::from_raw(2), container(2));
        cache.invalidate(ContainerId::from_raw(2));
        assert!(cache.get(ContainerId::from_raw(2)).is_none());
    }
}
