//! Core types and traits shared across the dedupfs workspace.
//!
//! This crate defines the data model named in spec §3: fingerprints,
//! container identifiers/addresses, block mappings, chunk mappings, the
//! unified error type (spec §7), shared size limits (spec §2/§4), and the
//! trait seams for collaborators spec §1 leaves unspecified (chunking,
//! hashing, compression).

#![warn(missing_docs)]

pub mod block_mapping;
pub mod chunk_mapping;
pub mod container_id;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod limits;
pub mod traits;

pub use block_mapping::{BlockMapping, BlockMappingItem, BlockMappingPair, UsageCountDelta};
pub use chunk_mapping::ChunkMapping;
pub use container_id::{ContainerAddress, ContainerId, ContainerIdGenerator};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use ids::{BlockId, LogId, VolumeId};
pub use traits::{Compressor, Fingerprinter, NoopCompressor};
