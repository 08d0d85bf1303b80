//! Container-file super-block (spec §3, §6): a 4 KiB header reserved at
//! file offset 0 of every container file.

use dedupfs_core::limits::{SUPERBLOCK_MAGIC, SUPERBLOCK_SIZE, SUPERBLOCK_VERSION};
use dedupfs_core::{Error, Result};
use std::io::{Read, Seek, SeekFrom, Write};
use uuid::Uuid;

/// Parsed super-block contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Unique id for the dedupfs instance that created this file set.
    pub uuid: Uuid,
    /// Which container file this super-block belongs to.
    pub file_index: u32,
    /// Total size of the container file, including the super-block.
    pub file_size: u64,
    /// Unix timestamp the file was created.
    pub created_at: u64,
}

impl Superblock {
    /// Build a fresh super-block for a newly created container file.
    pub fn new(uuid: Uuid, file_index: u32, file_size: u64, created_at: u64) -> Self {
        Self {
            uuid,
            file_index,
            file_size,
            created_at,
        }
    }

    /// Serialize to exactly [`SUPERBLOCK_SIZE`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.extend_from_slice(&SUPERBLOCK_MAGIC);
        buf.extend_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
        buf.extend_from_slice(self.uuid.as_bytes());
        buf.extend_from_slice(&self.file_index.to_le_bytes());
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        buf.resize(SUPERBLOCK_SIZE, 0);
        buf
    }

    /// Parse a super-block previously written by [`Self::to_bytes`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(Error::Corruption("super-block truncated".into()));
        }
        if buf[0..8] != SUPERBLOCK_MAGIC {
            return Err(Error::Corruption("super-block magic mismatch".into()));
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != SUPERBLOCK_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported super-block version {version}"
            )));
        }
        let uuid = Uuid::from_slice(&buf[12..28])
            .map_err(|e| Error::Corruption(format!("super-block uuid invalid: {e}")))?;
        let file_index = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        let file_size = u64::from_le_bytes(buf[32..40].try_into().unwrap());
        let created_at = u64::from_le_bytes(buf[40..48].try_into().unwrap());
        Ok(Self {
            uuid,
            file_index,
            file_size,
            created_at,
        })
    }

    /// Write the super-block at offset 0 of `file`.
    pub fn write_to<F: Write + Seek>(&self, file: &mut F) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read and parse the super-block from offset 0 of `file`.
    pub fn read_from<F: Read + Seek>(file: &mut F) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; SUPERBLOCK_SIZE];
        file.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_bytes() {
        let sb = Superblock::new(Uuid::from_bytes([7u8; 16]), 3, 1 << 30, 1_700_000_000);
        let bytes = sb.to_bytes();
        assert_eq!(bytes.len(), SUPERBLOCK_SIZE);
        assert_eq!(Superblock::from_bytes(&bytes).unwrap(), sb);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = vec![0u8; SUPERBLOCK_SIZE];
        bytes[0] = 0xFF;
        assert!(Superblock::from_bytes(&bytes).is_err());
    }

    #[test]
    fn write_then_read_from_cursor() {
        let sb = Superblock::new(Uuid::from_bytes([1u8; 16]), 0, 4096, 1);
        let mut cursor = Cursor::new(vec![0u8; SUPERBLOCK_SIZE]);
        sb.write_to(&mut cursor).unwrap();
        let reread = Superblock::read_from(&mut cursor).unwrap();
        assert_eq!(reread, sb);
    }
}
