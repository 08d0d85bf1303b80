//! Write and read caches for container storage (spec §4.3).

mod read_cache;
mod write_cache;

pub use read_cache::ReadCache;
pub use write_cache::{OpenContainer, WriteCache};
