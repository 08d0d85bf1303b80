//! Chunk mapping — the chunk-index value type (spec §3 "Chunk mapping").

use crate::container_id::ContainerId;
use crate::fingerprint::Fingerprint;
use crate::ids::{BlockId, LogId};
use serde::{Deserialize, Serialize};

/// `(fp, data_address, usage_count_change_log_id, block_hint)`.
///
/// `block_hint` names a block that may reference this chunk; it is a GC
/// convenience, not an authoritative reference list (GC policy itself is out
/// of scope — only this interaction point is specified).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMapping {
    /// The chunk's content fingerprint.
    pub fp: Fingerprint,
    /// Container holding the chunk's data.
    pub data_address: ContainerId,
    /// Log id of the event that last changed this chunk's usage count.
    pub usage_count_change_log_id: Option<LogId>,
    /// A block that may reference this chunk.
    pub block_hint: Option<BlockId>,
}

impl ChunkMapping {
    /// Build a mapping for a chunk freshly written alongside a block write.
    pub fn new(
        fp: Fingerprint,
        data_address: ContainerId,
        usage_count_change_log_id: LogId,
        block_hint: BlockId,
    ) -> Self {
        Self {
            fp,
            data_address,
            usage_count_change_log_id: Some(usage_count_change_log_id),
            block_hint: Some(block_hint),
        }
    }

    /// Serialize with MessagePack (the chunk index's persistent value format).
    pub fn serialize_to(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a value produced by [`Self::serialize_to`].
    pub fn unserialize_from(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
