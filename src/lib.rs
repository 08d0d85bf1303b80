//! # dedupfs
//!
//! Inline-deduplication block store core engine: content-addressed chunk
//! storage, a versioned block mapping layer, and the operation log that ties
//! them together crash-safely. Chunking, hashing, compression, and the
//! volume-facing protocol (e.g. iSCSI) are out of scope collaborators,
//! expressed as trait seams ([`Fingerprinter`], [`Compressor`]) the embedder
//! supplies.
//!
//! ```no_run
//! use dedupfs::{Engine, EngineConfig};
//! use std::path::Path;
//!
//! fn main() -> dedupfs::Result<()> {
//!     let engine = Engine::open(Path::new("./data"), EngineConfig::default())?;
//!     engine.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! Internal crates (`dedupfs-core`, `dedupfs-storage`, `dedupfs-concurrency`,
//! `dedupfs-durability`, `dedupfs-engine`) are implementation detail; this
//! crate re-exports the stable surface.

pub use dedupfs_core::{
    BlockId, BlockMapping, BlockMappingItem, BlockMappingPair, ChunkMapping, Compressor,
    ContainerAddress, ContainerId, ContainerIdGenerator, Error, Fingerprint, Fingerprinter,
    NoopCompressor, LogId, Result, UsageCountDelta, VolumeId,
};
pub use dedupfs_engine::{
    AuxiliaryBlockIndex, BackgroundImporter, ChunkIndex, ContainerTracker, Engine, EngineConfig,
    FailedBlockIndex, ImportPressure, ImporterConfig, InfoFile, PersistentBlockIndex,
    ShutdownStage, ShutdownTracker,
};
