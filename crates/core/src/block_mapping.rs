//! Block mapping — the per-block content map (spec §3 "Block mapping" /
//! "Block mapping pair").

use crate::container_id::ContainerId;
use crate::fingerprint::Fingerprint;
use crate::ids::{BlockId, LogId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One contiguous run within a block mapping: `(fp, fp_size, data_address,
/// chunk_offset, size)`. `fp_size` is carried explicitly (rather than derived
/// from `fp.len()`) because the wire format stores it up front to size the
/// fingerprint read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMappingItem {
    /// Chunk fingerprint.
    pub fp: Fingerprint,
    /// Container holding the chunk's data.
    pub data_address: ContainerId,
    /// Offset of this item's bytes within the chunk identified by `fp`.
    pub chunk_offset: u32,
    /// Number of bytes this item contributes to the block.
    pub size: u32,
}

impl BlockMappingItem {
    /// An item covering `size` bytes of the empty-data (zero-filled) chunk.
    pub fn empty_data(size: u32) -> Self {
        Self {
            fp: Fingerprint::empty_data(),
            data_address: ContainerId::empty_data(),
            chunk_offset: 0,
            size,
        }
    }

    /// `fp_size` as carried on the wire (spec §3's item tuple names it
    /// separately from `fp` for forward on-disk compatibility).
    pub fn fp_size(&self) -> usize {
        self.fp.len()
    }
}

/// Ordered list of items covering exactly one block's contents, plus the
/// version/provenance metadata spec §3 requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMapping {
    /// Which block this mapping describes.
    pub block_id: BlockId,
    /// Monotonic version number; a block's versions are totally ordered.
    pub version: u64,
    /// Log id of the `BlockMappingWritten` event that produced this mapping,
    /// if it was derived from a log record (absent for the freshly created
    /// default mapping of a brand-new block).
    pub event_log_id: Option<LogId>,
    /// Items tiling `[0, block_size)` with no gap or overlap.
    pub items: Vec<BlockMappingItem>,
}

impl BlockMapping {
    /// The initial mapping for a freshly created block: a single item of the
    /// empty-data fingerprint covering the whole block (spec §3).
    pub fn initial(block_id: BlockId, block_size: u32) -> Self {
        Self {
            block_id,
            version: 0,
            event_log_id: None,
            items: vec![BlockMappingItem::empty_data(block_size)],
        }
    }

    /// Sum of item sizes (should equal the volume block size; see
    /// [`Self::validate_coverage`]).
    pub fn covered_size(&self) -> u64 {
        self.items.iter().map(|i| i.size as u64).sum()
    }

    /// Check the block-mapping-coverage invariant (spec §8): items sum to
    /// exactly `block_size` with no gap or overlap. Contiguity is implicit in
    /// a flat item list with no offset field for the block itself — each
    /// item is assumed to directly follow the previous one, so this reduces
    /// to a non-empty list whose sizes sum correctly and whose members are
    /// individually non-empty.
    pub fn validate_coverage(&self, block_size: u32) -> bool {
        if self.items.is_empty() {
            return false;
        }
        if self.items.iter().any(|i| i.size == 0) {
            return false;
        }
        self.covered_size() == block_size as u64
    }

    /// Every distinct container id referenced by this mapping's items,
    /// excluding the reserved empty-data id (spec §4.6.2 "compute used
    /// containers").
    pub fn referenced_containers(&self) -> Vec<ContainerId> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for item in &self.items {
            if item.data_address.is_empty_data() {
                continue;
            }
            if seen.insert(item.data_address) {
                out.push(item.data_address);
            }
        }
        out
    }

    /// Serialize with MessagePack, matching the wire format named in spec §6.
    pub fn serialize_to(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a value produced by [`Self::serialize_to`].
    pub fn unserialize_from(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Signed per-fingerprint usage-count delta derived from diffing two block
/// mapping versions (spec §3 "Block mapping pair").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageCountDelta {
    /// The fingerprint whose usage count changed.
    pub fp: Fingerprint,
    /// The container that should be credited/debited.
    pub data_address: ContainerId,
    /// Signed usage-count change (+1 per new reference, -1 per removed one).
    pub delta: i64,
}

/// `(block_id, previous_mapping, modified_mapping)` — the canonical payload
/// of `BlockMappingWritten` / `BlockMappingDeleted` / `BlockMappingWriteFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMappingPair {
    /// The block being updated.
    pub block_id: BlockId,
    /// The mapping being replaced (`None` for a block's first write).
    pub previous_mapping: Option<BlockMapping>,
    /// The mapping taking effect.
    pub modified_mapping: BlockMapping,
}

impl BlockMappingPair {
    /// Diff `previous_mapping` against `modified_mapping`, yielding a signed
    /// usage-count delta per distinct fingerprint (spec §3).
    pub fn usage_count_deltas(&self) -> Vec<UsageCountDelta> {
        let mut counts: HashMap<(Fingerprint, ContainerId), i64> = HashMap::new();

        if let Some(prev) = &self.previous_mapping {
            for item in &prev.items {
                if item.fp.is_empty_data() {
                    continue;
                }
                *counts
                    .entry((item.fp.clone(), item.data_address))
                    .or_insert(0) -= 1;
            }
        }
        for item in &self.modified_mapping.items {
            if item.fp.is_empty_data() {
                continue;
            }
            *counts
                .entry((item.fp.clone(), item.data_address))
                .or_insert(0) += 1;
        }

        counts
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .map(|((fp, data_address), delta)| UsageCountDelta {
                fp,
                data_address,
                delta,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(fp: u8, addr: u64, size: u32) -> BlockMappingItem {
        BlockMappingItem {
            fp: Fingerprint::new(vec![fp]).unwrap(),
            data_address: ContainerId::from_raw(addr),
            chunk_offset: 0,
            size,
        }
    }

    #[test]
    fn initial_mapping_covers_whole_block() {
        let mapping = BlockMapping::initial(BlockId(1), 4096);
        assert!(mapping.validate_coverage(4096));
        assert!(mapping.referenced_containers().is_empty());
    }

    #[test]
    fn coverage_rejects_gaps_and_overlaps() {
        let mut mapping = BlockMapping::initial(BlockId(1), 4096);
        mapping.items[0].size = 100;
        assert!(!mapping.validate_coverage(4096));
    }

    #[test]
    fn referenced_containers_deduplicates_and_skips_empty_data() {
        let mapping = BlockMapping {
            block_id: BlockId(1),
            version: 1,
            event_log_id: None,
            items: vec![
                item(1, 10, 100),
                item(2, 10, 100),
                BlockMappingItem::empty_data(100),
                item(3, 20, 100),
            ],
        };
        let containers = mapping.referenced_containers();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0], ContainerId::from_raw(10));
        assert_eq!(containers[1], ContainerId::from_raw(20));
    }

    #[test]
    fn usage_count_deltas_cancel_identical_items() {
        let prev = BlockMapping {
            block_id: BlockId(1),
            version: 0,
            event_log_id: None,
            items: vec![item(1, 10, 4096)],
        };
        let modified = BlockMapping {
            block_id: BlockId(1),
            version: 1,
            event_log_id: None,
            items: vec![item(1, 10, 4096)],
        };
        let pair = BlockMappingPair {
            block_id: BlockId(1),
            previous_mapping: Some(prev),
            modified_mapping: modified,
        };
        assert!(pair.usage_count_deltas().is_empty());
    }

    #[test]
    fn usage_count_deltas_credit_new_and_debit_old() {
        let prev = BlockMapping {
            block_id: BlockId(1),
            version: 0,
            event_log_id: None,
            items: vec![item(1, 10, 4096)],
        };
        let modified = BlockMapping {
            block_id: BlockId(1),
            version: 1,
            event_log_id: None,
            items: vec![item(2, 20, 4096)],
        };
        let pair = BlockMappingPair {
            block_id: BlockId(1),
            previous_mapping: Some(prev),
            modified_mapping: modified,
        };
        let deltas = pair.usage_count_deltas();
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().any(|d| d.delta == -1 && d.data_address.raw() == 10));
        assert!(deltas.iter().any(|d| d.delta == 1 && d.data_address.raw() == 20));
    }

    #[test]
    fn block_mapping_round_trips_through_wire_format() {
        let mapping = BlockMapping {
            block_id: BlockId(42),
            version: 3,
            event_log_id: Some(LogId(7)),
            items: vec![item(1, 10, 4096)],
        };
        let bytes = mapping.serialize_to().unwrap();
        let restored = BlockMapping::unserialize_from(&bytes).unwrap();
        assert_eq!(mapping, restored);
    }
}
