//! Key-value index backends (spec §4.1).

pub mod disk_hash;
pub mod redb_index;
pub mod traits;
pub mod write_back;

pub use disk_hash::{DiskHashConfig, DiskHashIndex};
pub use redb_index::RedbIndex;
pub use traits::{
    Capabilities, CasResult, DeleteResult, KvIndex, LookupResult, PutIfAbsentResult, PutResult,
};
pub use write_back::{EnsurePersistentResult, WriteBackCache};
