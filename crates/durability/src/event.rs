//! Operation log event kinds and payloads (spec §3 "Operation log").

use dedupfs_core::{BlockMappingPair, ContainerAddress, ContainerId, Fingerprint, LogId, VolumeId};
use serde::{Deserialize, Serialize};

/// Discriminant stored alongside each record, used to dispatch to consumers
/// without deserializing the payload first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventType {
    /// A block's mapping was written (confirmed or not — see payload).
    BlockMappingWritten = 1,
    /// A block's mapping was deleted.
    BlockMappingDeleted = 2,
    /// A block write failed after a `BlockMappingWritten` was already logged.
    BlockMappingWriteFailed = 3,
    /// A new container was opened for writing.
    ContainerOpened = 4,
    /// A container was durably committed to disk.
    ContainerCommitted = 5,
    /// A container commit attempt failed.
    ContainerCommitFailed = 6,
    /// Two committed containers were merged into a new one.
    ContainerMerged = 7,
    /// A committed container was rewritten at a new address.
    ContainerMoved = 8,
    /// An (empty) committed container was deleted.
    ContainerDeleted = 9,
    /// Chunks written for a failed block write are GC candidates.
    OrphanChunks = 10,
    /// A volume was attached.
    VolumeAttach = 11,
    /// A volume was detached.
    VolumeDetach = 12,
    /// Sentinel marking a clean, empty log (written at format time).
    LogEmpty = 13,
}

/// The payload carried by each event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// See [`EventType::BlockMappingWritten`].
    BlockMappingWritten(BlockMappingPair),
    /// See [`EventType::BlockMappingDeleted`].
    BlockMappingDeleted(BlockMappingPair),
    /// `(pair, write_event_log_id)` — see [`EventType::BlockMappingWriteFailed`].
    BlockMappingWriteFailed(BlockMappingPair, Option<LogId>),
    /// `{id, address}`.
    ContainerOpened {
        /// Newly allocated container id.
        id: ContainerId,
        /// Address the container was opened at.
        address: ContainerAddress,
    },
    /// `{id, address, active_data_size, item_count}`.
    ContainerCommitted {
        /// Committed container id.
        id: ContainerId,
        /// On-disk address.
        address: ContainerAddress,
        /// Bytes still live (non-deleted items + metadata).
        active_data_size: u64,
        /// Number of items in the container.
        item_count: u32,
    },
    /// The id whose commit attempt failed.
    ContainerCommitFailed {
        /// Container id whose commit failed.
        id: ContainerId,
    },
    /// `{a, b, new}`.
    ContainerMerged {
        /// First source container.
        a: ContainerId,
        /// Second source container.
        b: ContainerId,
        /// Newly allocated surviving container.
        new: ContainerId,
    },
    /// `{old, new}`.
    ContainerMoved {
        /// Previous id/address.
        old: ContainerId,
        /// New id/address the container now lives at.
        new: ContainerId,
    },
    /// The id of the deleted (empty) container.
    ContainerDeleted {
        /// Deleted container id.
        id: ContainerId,
    },
    /// Fingerprints that were written solely for a failed block write.
    OrphanChunks {
        /// Candidate fingerprints for GC consideration.
        fingerprints: Vec<Fingerprint>,
    },
    /// A volume was attached.
    VolumeAttach {
        /// Volume that was attached.
        volume: VolumeId,
    },
    /// A volume was detached.
    VolumeDetach {
        /// Volume that was detached.
        volume: VolumeId,
    },
    /// No payload.
    LogEmpty,
}

impl EventPayload {
    /// The [`EventType`] discriminant for this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::BlockMappingWritten(_) => EventType::BlockMappingWritten,
            EventPayload::BlockMappingDeleted(_) => EventType::BlockMappingDeleted,
            EventPayload::BlockMappingWriteFailed(_, _) => EventType::BlockMappingWriteFailed,
            EventPayload::ContainerOpened { .. } => EventType::ContainerOpened,
            EventPayload::ContainerCommitted { .. } => EventType::ContainerCommitted,
            EventPayload::ContainerCommitFailed { .. } => EventType::ContainerCommitFailed,
            EventPayload::ContainerMerged { .. } => EventType::ContainerMerged,
            EventPayload::ContainerMoved { .. } => EventType::ContainerMoved,
            EventPayload::ContainerDeleted { .. } => EventType::ContainerDeleted,
            EventPayload::OrphanChunks { .. } => EventType::OrphanChunks,
            EventPayload::VolumeAttach { .. } => EventType::VolumeAttach,
            EventPayload::VolumeDetach { .. } => EventType::VolumeDetach,
            EventPayload::LogEmpty => EventType::LogEmpty,
        }
    }
}
