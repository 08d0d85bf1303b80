//! Startup metadata file (SPEC_FULL.md §11): a small versioned header
//! persisting the next-container-id counter across restarts, so the
//! generator doesn't have to replay the whole operation log just to learn
//! where it left off.

use dedupfs_core::{Error, Result};
use std::io::Write;
use std::path::Path;

const INFO_MAGIC: [u8; 8] = *b"DDFSINFO";
const INFO_VERSION: u32 = 1;
const INFO_SIZE: usize = 24;

/// Parsed contents of the `info` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoFile {
    /// Next id [`dedupfs_core::ContainerIdGenerator`] will hand out.
    pub next_container_id: u64,
}

impl InfoFile {
    fn to_bytes(self) -> [u8; INFO_SIZE] {
        let mut buf = [0u8; INFO_SIZE];
        buf[0..8].copy_from_slice(&INFO_MAGIC);
        buf[8..12].copy_from_slice(&INFO_VERSION.to_le_bytes());
        buf[16..24].copy_from_slice(&self.next_container_id.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < INFO_SIZE {
            return Err(Error::Corruption("info file truncated".into()));
        }
        if buf[0..8] != INFO_MAGIC {
            return Err(Error::Corruption("info file magic mismatch".into()));
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != INFO_VERSION {
            return Err(Error::Corruption(format!("unsupported info file version {version}")));
        }
        let next_container_id = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        Ok(Self { next_container_id })
    }

    /// Read the info file at `path`, or `None` if it doesn't exist yet (a
    /// fresh instance with nothing written).
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically write the info file: write to a temp path, then rename
    /// over the real one, so a crash mid-write never leaves a torn file.
    pub fn write(self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&self.to_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        assert!(InfoFile::read(&dir.path().join("info")).unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("info");
        let info = InfoFile { next_container_id: 42 };
        info.write(&path).unwrap();
        assert_eq!(InfoFile::read(&path).unwrap(), Some(info));
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("info");
        std::fs::write(&path, [0u8; INFO_SIZE]).unwrap();
        assert!(InfoFile::read(&path).is_err());
    }
}
