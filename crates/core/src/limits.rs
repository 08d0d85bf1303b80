//! Compile-time and default-configuration limits shared across crates.
//!
//! These mirror the constants named throughout spec §3/§4 (`kMaxFingerprintSize`,
//! `kLeastValidContainerId`, `kMinCompressedChunkSize`, …). Keeping them in one
//! place avoids every crate re-deriving "what counts as a reserved id".

/// Largest fingerprint size the engine will accept, in bytes.
pub const MAX_FINGERPRINT_SIZE: usize = 32;

/// Smallest valid (non-reserved) container id.
///
/// Ids below this are reserved: 0 is the illegal sentinel, 1 is the
/// empty-data (all-zero block) sentinel.
pub const LEAST_VALID_CONTAINER_ID: u64 = 2;

/// Container id reserved for "illegal" / uninitialized references.
pub const ILLEGAL_CONTAINER_ID: u64 = 0;

/// Container id reserved for the empty-data (zero-filled) address.
pub const EMPTY_DATA_CONTAINER_ID: u64 = 1;

/// Default container size (4 MiB), matching spec §3.
pub const DEFAULT_CONTAINER_SIZE: u64 = 4 * 1024 * 1024;

/// Size of the metadata area at the front of every container (4 KiB).
pub const CONTAINER_METADATA_SIZE: usize = 4 * 1024;

/// Size of the super-block reserved at file offset 0 of every container file.
pub const SUPERBLOCK_SIZE: usize = 4 * 1024;

/// Chunks smaller than this are never compressed (spec §4.2).
pub const MIN_COMPRESSED_CHUNK_SIZE: usize = 512;

/// Default number of concurrently open write-cache containers.
pub const DEFAULT_WRITE_CONTAINER_COUNT: usize = 4;

/// Default container open-to-forced-commit timeout, in seconds (spec §4.3, §5).
pub const DEFAULT_CONTAINER_TIMEOUT_SECONDS: u64 = 4;

/// Default read-cache size, in container-sized slots.
pub const DEFAULT_READ_CACHE_SLOTS: usize = 256;

/// Default import batch size for the background block-index importer (spec §4.6.3).
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 256;

/// Default auxiliary block index soft limit, in entries.
pub const DEFAULT_AUX_SOFT_LIMIT: usize = 16 * 1024;

/// Minimum auxiliary block index hard limit, in entries (spec §4.6.3).
pub const MIN_AUX_HARD_LIMIT: usize = 32 * 1024;

/// Number of shards in lock arrays (`BlockLocks`, `ChunkLocks`, container locks).
pub const DEFAULT_LOCK_SHARD_COUNT: usize = 256;

/// Magic bytes identifying a dedupfs super-block on disk.
pub const SUPERBLOCK_MAGIC: [u8; 8] = *b"DEDUPV1\0";

/// Current on-disk super-block format version.
pub const SUPERBLOCK_VERSION: u32 = 1;
