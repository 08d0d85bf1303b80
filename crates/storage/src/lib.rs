//! Container storage layer (spec §4.2–§4.4): key-value index backends, the
//! container on-disk format, the bitmap allocator, read/write caches, the
//! persistent metadata index, and the orchestration that ties them together.

#![warn(missing_docs)]

pub mod allocator;
pub mod cache;
pub mod container;
pub mod container_storage;
pub mod kv;
pub mod metadata_index;
pub mod superblock;

pub use allocator::{Bitmap, FileSetAllocator, OS_PAGE_SIZE};
pub use cache::{OpenContainer, ReadCache, WriteCache};
pub use container::{Container, ContainerMetadata, ItemDescriptor};
pub use container_storage::{ContainerStorage, ContainerStorageConfig};
pub use metadata_index::MetadataIndex;
pub use superblock::Superblock;
