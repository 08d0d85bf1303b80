//! Bitmap allocator (spec §4.4).

mod bitmap;
mod file_set;

pub use bitmap::Bitmap;
pub use file_set::{FileSetAllocator, OS_PAGE_SIZE};
