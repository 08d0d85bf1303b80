//! Container identifiers and addresses (spec §3 "Container address" / "Container id space").

use crate::limits::{EMPTY_DATA_CONTAINER_ID, ILLEGAL_CONTAINER_ID, LEAST_VALID_CONTAINER_ID};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A container's lifetime identifier: monotonically increasing 64-bit integer.
///
/// Every container has one primary id; after merges it may accumulate
/// secondary ids that resolve to the primary id of the surviving container
/// through the metadata index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Wrap a raw id value.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Raw integer value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The illegal sentinel id. Never appears on disk.
    pub const fn illegal() -> Self {
        Self(ILLEGAL_CONTAINER_ID)
    }

    /// The reserved empty-data address id. Never appears on disk.
    pub const fn empty_data() -> Self {
        Self(EMPTY_DATA_CONTAINER_ID)
    }

    /// True if this id is valid for an on-disk container (spec §3 invariant).
    pub const fn is_valid(self) -> bool {
        self.0 >= LEAST_VALID_CONTAINER_ID
    }

    /// True if this is the illegal sentinel.
    pub const fn is_illegal(self) -> bool {
        self.0 == ILLEGAL_CONTAINER_ID
    }

    /// True if this is the reserved empty-data id.
    pub const fn is_empty_data(self) -> bool {
        self.0 == EMPTY_DATA_CONTAINER_ID
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic allocator for primary container ids.
///
/// Persisted at shutdown/start in the `info/` directory (spec §6), restored
/// on open so ids never repeat across a restart.
#[derive(Debug)]
pub struct ContainerIdGenerator {
    next: std::sync::atomic::AtomicU64,
}

impl ContainerIdGenerator {
    /// Build a generator that will hand out `starting_at` next.
    pub fn new(starting_at: u64) -> Self {
        let floor = starting_at.max(LEAST_VALID_CONTAINER_ID);
        Self {
            next: std::sync::atomic::AtomicU64::new(floor),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> ContainerId {
        let id = self
            .next
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        ContainerId::from_raw(id)
    }

    /// Current high-water mark, i.e. the next id that will be handed out.
    pub fn peek(&self) -> u64 {
        self.next.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Ensure the generator never hands out an id below `at_least`.
    ///
    /// Used during log replay, where `ContainerOpened` events may name ids
    /// higher than the persisted high-water mark if the clean-shutdown
    /// write of `info/` was itself never reached.
    pub fn observe(&self, at_least: u64) {
        self.next
            .fetch_max(at_least + 1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// On-disk location of a container: a file index plus an offset within it.
///
/// `file_offset` is always a multiple of the container size, and is relative
/// to end-of-superblock; callers adjust by [`crate::limits::SUPERBLOCK_SIZE`]
/// at I/O time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerAddress {
    /// Which container file this address lives in.
    pub file_index: u32,
    /// Byte offset within the file, relative to end-of-superblock.
    pub file_offset: u64,
}

impl ContainerAddress {
    /// Construct an address, asserting the offset is container-size aligned.
    pub fn new(file_index: u32, file_offset: u64, container_size: u64) -> Self {
        debug_assert_eq!(file_offset % container_size, 0);
        Self {
            file_index,
            file_offset,
        }
    }

    /// The slot index within the file (`file_offset / container_size`).
    pub fn slot(&self, container_size: u64) -> u64 {
        self.file_offset / container_size
    }
}

impl fmt::Display for ContainerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(file={}, offset={})", self.file_index, self.file_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_hands_out_increasing_ids() {
        let gen = ContainerIdGenerator::new(LEAST_VALID_CONTAINER_ID);
        let a = gen.next();
        let b = gen.next();
        assert!(a.raw() < b.raw());
    }

    #[test]
    fn generator_observe_bumps_floor() {
        let gen = ContainerIdGenerator::new(LEAST_VALID_CONTAINER_ID);
        gen.observe(1000);
        assert!(gen.next().raw() > 1000);
    }

    #[test]
    fn reserved_ids_are_never_valid() {
        assert!(!ContainerId::illegal().is_valid());
        assert!(!ContainerId::empty_data().is_valid());
        assert!(ContainerId::from_raw(LEAST_VALID_CONTAINER_ID).is_valid());
    }

    #[test]
    fn address_slot_computation() {
        let addr = ContainerAddress::new(0, 3 * 4096, 4096);
        assert_eq!(addr.slot(4096), 3);
    }
}
