//! Fixed-size, append-only log segment files.
//!
//! The operation log is a ring of segments; only the active segment is
//! writable, closed segments are immutable. Adapted from the teacher's
//! `WalSegment` (`crates/durability/src/format/wal_record.rs`), generalized
//! from a single-database WAL to the engine's multi-consumer operation log.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a dedupfs operation-log segment.
pub const SEGMENT_MAGIC: [u8; 4] = *b"DDLG";

/// Segment header format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header, in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Header written at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes identifying this as a dedupfs log segment.
    pub magic: [u8; 4],
    /// Format version, for forward compatibility.
    pub format_version: u32,
    /// Monotonically increasing segment number.
    pub segment_number: u64,
}

impl SegmentHeader {
    /// Build a header for `segment_number`.
    pub fn new(segment_number: u64) -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
        }
    }

    /// Serialize to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes
    }

    /// Parse a header previously produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        let magic: [u8; 4] = bytes[0..4].try_into().ok()?;
        if magic != SEGMENT_MAGIC {
            return None;
        }
        Some(Self {
            magic,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            segment_number: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
        })
    }
}

/// A single log segment file.
pub struct LogSegment {
    file: File,
    segment_number: u64,
    write_position: u64,
    path: PathBuf,
    closed: bool,
}

impl LogSegment {
    /// Create a brand-new segment file and write its header.
    pub fn create(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;
        let header = SegmentHeader::new(segment_number);
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;
        Ok(Self {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
            closed: false,
        })
    }

    /// Open an existing segment for appending, seeking to end-of-file.
    pub fn open_append(dir: &Path, segment_number: u64) -> std::io::Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        if SegmentHeader::from_bytes(&header_bytes).is_none() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "segment header corrupt or has wrong magic",
            ));
        }
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            segment_number,
            write_position: len,
            path,
            closed: false,
        })
    }

    /// Open an existing segment read-only, for scanning.
    pub fn open_read(dir: &Path, segment_number: u64) -> std::io::Result<File> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new().read(true).open(&path)?;
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        Ok(file)
    }

    /// Append raw bytes (already including the length prefix) to the file.
    pub fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes)?;
        self.write_position += bytes.len() as u64;
        Ok(())
    }

    /// Force the current contents to disk.
    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    /// Mark this segment closed; future appends are rejected by the writer.
    pub fn close(&mut self) -> std::io::Result<()> {
        self.sync()?;
        self.closed = true;
        Ok(())
    }

    /// Current file size, in bytes.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// This segment's number.
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Path to the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("segment-{:06}", segment_number))
    }

    /// Public helper so readers/writers agree on file naming.
    pub fn path_for(dir: &Path, segment_number: u64) -> PathBuf {
        Self::segment_path(dir, segment_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_append_then_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut seg = LogSegment::create(dir.path(), 1).unwrap();
            seg.write(b"hello").unwrap();
            seg.sync().unwrap();
        }
        let seg = LogSegment::open_append(dir.path(), 1).unwrap();
        assert_eq!(seg.size(), SEGMENT_HEADER_SIZE as u64 + 5);
    }

    #[test]
    fn header_round_trips() {
        let header = SegmentHeader::new(42);
        let bytes = header.to_bytes();
        let restored = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, restored);
    }
}
