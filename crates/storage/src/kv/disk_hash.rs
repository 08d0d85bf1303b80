//! Transactional disk-hash index (spec §4.1), the backend used for the
//! chunk index.
//!
//! Every bucket lives in a fixed-size page of a single data file. Before a
//! page is overwritten, its *new* contents are first written to one of a
//! fixed number of transaction areas in a separate file, tagged with the
//! CRC of the page being replaced and the CRC of the replacement. If the
//! process dies between the transaction write and the page write, restart
//! recovery walks every transaction area and, by comparing checksums,
//! figures out whether the real page write completed, never happened, or
//! was torn — and repairs the page from the transaction log in the last
//! case. Grounded on `disk_hash_index_transaction.cc`'s
//! `DiskHashIndexTransactionSystem`/`DiskHashIndexTransaction`.

use super::traits::{Capabilities, DeleteResult, KvIndex, LookupResult, PutResult};
use dedupfs_core::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Page size in bytes. Matches [`dedupfs_core::limits`] conventions in
/// spirit: small enough for a single `pread`/`pwrite`, large enough to hold
/// a realistic bucket's worth of fingerprint entries.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Number of transaction areas multiplexed over the transaction file.
/// Several buckets share an area (`bucket_id % area_count`); only the most
/// recent transaction per area survives a crash, which is sufficient since
/// a transaction is only "in flight" for the duration of one page write.
pub const DEFAULT_TRANSACTION_AREA_COUNT: u32 = 1024;

/// Configuration for a [`DiskHashIndex`].
#[derive(Debug, Clone)]
pub struct DiskHashConfig {
    /// Number of buckets the hash space is split into.
    pub bucket_count: u64,
    /// Size in bytes of a single on-disk page.
    pub page_size: u32,
    /// Number of transaction areas.
    pub transaction_area_count: u32,
}

impl Default for DiskHashConfig {
    fn default() -> Self {
        Self {
            bucket_count: 1024,
            page_size: DEFAULT_PAGE_SIZE,
            transaction_area_count: DEFAULT_TRANSACTION_AREA_COUNT,
        }
    }
}

impl DiskHashConfig {
    fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(Error::Configuration("bucket_count must be > 0".into()));
        }
        if self.page_size < 64 {
            return Err(Error::Configuration("page_size too small".into()));
        }
        if self.transaction_area_count == 0 {
            return Err(Error::Configuration(
                "transaction_area_count must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct TransactionPageData {
    bucket_id: Option<u64>,
    original_crc: u32,
    transaction_crc: u32,
    version: u64,
    item_count: u64,
    data: Vec<u8>,
}

impl TransactionPageData {
    fn to_bytes(&self, page_size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(page_size as usize);
        buf.push(if self.bucket_id.is_some() { 1 } else { 0 });
        buf.extend_from_slice(&self.bucket_id.unwrap_or(0).to_le_bytes());
        buf.extend_from_slice(&self.original_crc.to_le_bytes());
        buf.extend_from_slice(&self.transaction_crc.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.item_count.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.resize(page_size as usize, 0);
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        if buf.len() < 37 || buf[0] == 0 {
            return Self::default();
        }
        let bucket_id = u64::from_le_bytes(buf[1..9].try_into().unwrap());
        let original_crc = u32::from_le_bytes(buf[9..13].try_into().unwrap());
        let transaction_crc = u32::from_le_bytes(buf[13..17].try_into().unwrap());
        let version = u64::from_le_bytes(buf[17..25].try_into().unwrap());
        let item_count = u64::from_le_bytes(buf[25..33].try_into().unwrap());
        let data_len = u32::from_le_bytes(buf[33..37].try_into().unwrap()) as usize;
        let data = buf.get(37..37 + data_len).unwrap_or(&[]).to_vec();
        Self {
            bucket_id: Some(bucket_id),
            original_crc,
            transaction_crc,
            version,
            item_count,
            data,
        }
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn encode_items(items: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (k, v) in items {
        buf.extend_from_slice(&(k.len() as u32).to_le_bytes());
        buf.extend_from_slice(k);
        buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
        buf.extend_from_slice(v);
    }
    buf
}

fn decode_items(mut buf: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut items = Vec::new();
    while buf.len() >= 4 {
        let klen = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if buf.len() < 4 + klen + 4 {
            break;
        }
        let key = buf[4..4 + klen].to_vec();
        let rest = &buf[4 + klen..];
        let vlen = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        if rest.len() < 4 + vlen {
            break;
        }
        let value = rest[4..4 + vlen].to_vec();
        items.push((key, value));
        buf = &rest[4 + vlen..];
    }
    items
}

/// A page's used-portion bytes plus the CRC computed over them.
struct EncodedPage {
    used_bytes: Vec<u8>,
    crc: u32,
}

fn encode_page(items: &[(Vec<u8>, Vec<u8>)]) -> EncodedPage {
    let used_bytes = encode_items(items);
    let crc = crc32(&used_bytes);
    EncodedPage { used_bytes, crc }
}

/// Transactional, bucket-hashed disk index. See module docs.
pub struct DiskHashIndex {
    data_file: File,
    trans_file: Mutex<File>,
    config: DiskHashConfig,
    version_counter: AtomicU64,
    item_count: AtomicU64,
}

impl DiskHashIndex {
    /// Open (creating if necessary) a disk-hash index backed by `data_path`
    /// and `trans_path`.
    pub fn open(data_path: &Path, trans_path: &Path, config: DiskHashConfig) -> Result<Self> {
        config.validate()?;

        let data_is_new = !data_path.exists();
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(data_path)?;
        if data_is_new {
            let page = vec![0u8; config.page_size as usize];
            for bucket in 0..config.bucket_count {
                data_file.write_at(&page, bucket * config.page_size as u64)?;
            }
            data_file.sync_all()?;
        }

        let trans_is_new = !trans_path.exists();
        let trans_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(trans_path)?;
        if trans_is_new {
            let page = vec![0u8; config.page_size as usize];
            for area in 0..config.transaction_area_count {
                trans_file.write_at(&page, area as u64 * config.page_size as u64)?;
            }
            trans_file.sync_all()?;
        }

        let index = Self {
            data_file,
            trans_file: Mutex::new(trans_file),
            config,
            version_counter: AtomicU64::new(0),
            item_count: AtomicU64::new(0),
        };
        if !trans_is_new || !data_is_new {
            index.restore()?;
        }
        index.recount_items()?;
        Ok(index)
    }

    fn bucket_of(&self, key: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() % self.config.bucket_count
    }

    fn bucket_offset(&self, bucket_id: u64) -> u64 {
        bucket_id * self.config.page_size as u64
    }

    fn area_of(&self, bucket_id: u64) -> u64 {
        bucket_id % self.config.transaction_area_count as u64
    }

    fn area_offset(&self, area: u64) -> u64 {
        area * self.config.page_size as u64
    }

    fn read_page_raw(&self, bucket_id: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.config.page_size as usize];
        self.data_file.read_at(&mut buf, self.bucket_offset(bucket_id))?;
        Ok(buf)
    }

    fn page_used_bytes(raw: &[u8]) -> &[u8] {
        if raw.len() < 4 {
            return &[];
        }
        let used_size = u32::from_le_bytes(raw[0..4].try_into().unwrap()) as usize;
        raw.get(4..4 + used_size).unwrap_or(&[])
    }

    fn read_items(&self, bucket_id: u64) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let raw = self.read_page_raw(bucket_id)?;
        Ok(decode_items(Self::page_used_bytes(&raw)))
    }

    /// Write `encoded` as the new page for `bucket_id`, going through the
    /// transaction area first.
    fn write_page(&self, bucket_id: u64, encoded: &EncodedPage) -> Result<()> {
        let original_raw = self.read_page_raw(bucket_id)?;
        let original_crc = crc32(Self::page_used_bytes(&original_raw));

        let version = self.version_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let item_count = self.item_count.load(Ordering::SeqCst);

        let txn = TransactionPageData {
            bucket_id: Some(bucket_id),
            original_crc,
            transaction_crc: encoded.crc,
            version,
            item_count,
            data: encoded.used_bytes.clone(),
        };
        let area = self.area_of(bucket_id);
        {
            let trans_file = self.trans_file.lock().unwrap();
            let bytes = txn.to_bytes(self.config.page_size);
            trans_file.write_at(&bytes, self.area_offset(area))?;
            trans_file.sync_all()?;
        }

        let mut page_buf = vec![0u8; self.config.page_size as usize];
        page_buf[0..4].copy_from_slice(&(encoded.used_bytes.len() as u32).to_le_bytes());
        let end = 4 + encoded.used_bytes.len();
        page_buf[4..end].copy_from_slice(&encoded.used_bytes);
        self.data_file
            .write_at(&page_buf, self.bucket_offset(bucket_id))?;
        self.data_file.sync_all()?;
        Ok(())
    }

    /// Walk every transaction area and repair any page whose write was
    /// interrupted.
    fn restore(&self) -> Result<()> {
        let area_count = self.config.transaction_area_count as u64;
        for area in 0..area_count {
            let mut buf = vec![0u8; self.config.page_size as usize];
            {
                let trans_file = self.trans_file.lock().unwrap();
                trans_file.read_at(&mut buf, self.area_offset(area))?;
            }
            let txn = TransactionPageData::from_bytes(&buf);
            let bucket_id = match txn.bucket_id {
                Some(id) => id,
                None => continue,
            };
            if crc32(&txn.data) != txn.transaction_crc {
                // the transaction write itself was torn; the original page
                // on disk was never touched.
                continue;
            }

            let current_raw = self.read_page_raw(bucket_id)?;
            let current_crc = crc32(Self::page_used_bytes(&current_raw));

            if current_crc == txn.transaction_crc {
                self.bump_counters(txn.version, txn.item_count);
                continue;
            }
            if current_crc == txn.original_crc {
                // the real page write never happened; original data is
                // already in place, nothing to recover.
                continue;
            }

            // page is neither the pre- nor post-image: corrupted mid-write.
            // restore it from the transaction log's forward data.
            let mut page_buf = vec![0u8; self.config.page_size as usize];
            page_buf[0..4].copy_from_slice(&(txn.data.len() as u32).to_le_bytes());
            let end = 4 + txn.data.len();
            page_buf[4..end].copy_from_slice(&txn.data);
            self.data_file
                .write_at(&page_buf, self.bucket_offset(bucket_id))?;
            self.bump_counters(txn.version, txn.item_count);
        }
        self.data_file.sync_all()?;
        Ok(())
    }

    fn bump_counters(&self, version: u64, item_count: u64) {
        self.version_counter.fetch_max(version, Ordering::SeqCst);
        self.item_count.store(item_count, Ordering::SeqCst);
    }

    fn recount_items(&self) -> Result<()> {
        let mut total = 0u64;
        for bucket in 0..self.config.bucket_count {
            total += self.read_items(bucket)?.len() as u64;
        }
        self.item_count.store(total, Ordering::SeqCst);
        Ok(())
    }
}

impl KvIndex for DiskHashIndex {
    fn capabilities(&self) -> Capabilities {
        Capabilities::PERSISTENT_ITEM_COUNT | Capabilities::HAS_ITERATOR
    }

    fn lookup(&self, key: &[u8]) -> Result<LookupResult<Vec<u8>>> {
        let bucket = self.bucket_of(key);
        let items = self.read_items(bucket)?;
        for (k, v) in items {
            if k == key {
                return Ok(LookupResult::Found(v));
            }
        }
        Ok(LookupResult::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<PutResult> {
        let bucket = self.bucket_of(key);
        let mut items = self.read_items(bucket)?;
        let mut found = false;
        let mut unchanged = false;
        for item in items.iter_mut() {
            if item.0 == key {
                if item.1 == value {
                    unchanged = true;
                }
                item.1 = value.to_vec();
                found = true;
                break;
            }
        }
        if unchanged {
            return Ok(PutResult::Keep);
        }
        if !found {
            items.push((key.to_vec(), value.to_vec()));
            self.item_count.fetch_add(1, Ordering::SeqCst);
        }
        let encoded = encode_page(&items);
        if encoded.used_bytes.len() + 4 > self.config.page_size as usize {
            return Err(Error::Full(format!(
                "bucket {bucket} page full ({} bytes needed, {} available)",
                encoded.used_bytes.len() + 4,
                self.config.page_size
            )));
        }
        self.write_page(bucket, &encoded)?;
        Ok(PutResult::Ok)
    }

    fn delete(&self, key: &[u8]) -> Result<DeleteResult> {
        let bucket = self.bucket_of(key);
        let mut items = self.read_items(bucket)?;
        let before = items.len();
        items.retain(|(k, _)| k != key);
        if items.len() == before {
            return Ok(DeleteResult::NotFound);
        }
        self.item_count.fetch_sub(1, Ordering::SeqCst);
        let encoded = encode_page(&items);
        self.write_page(bucket, &encoded)?;
        Ok(DeleteResult::Ok)
    }

    fn item_count(&self) -> u64 {
        self.item_count.load(Ordering::SeqCst)
    }

    fn create_iterator(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for bucket in 0..self.config.bucket_count {
            out.extend(self.read_items(bucket)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_config() -> DiskHashConfig {
        DiskHashConfig {
            bucket_count: 8,
            page_size: 512,
            transaction_area_count: 4,
        }
    }

    #[test]
    fn put_then_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let index = DiskHashIndex::open(
            &dir.path().join("data"),
            &dir.path().join("trans"),
            small_config(),
        )
        .unwrap();
        assert_eq!(index.put(b"fp1", b"loc1").unwrap(), PutResult::Ok);
        assert_eq!(
            index.lookup(b"fp1").unwrap(),
            LookupResult::Found(b"loc1".to_vec())
        );
        assert_eq!(index.item_count(), 1);
    }

    #[test]
    fn overwrite_with_identical_value_reports_keep() {
        let dir = tempdir().unwrap();
        let index = DiskHashIndex::open(
            &dir.path().join("data"),
            &dir.path().join("trans"),
            small_config(),
        )
        .unwrap();
        index.put(b"fp1", b"loc1").unwrap();
        assert_eq!(index.put(b"fp1", b"loc1").unwrap(), PutResult::Keep);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempdir().unwrap();
        let index = DiskHashIndex::open(
            &dir.path().join("data"),
            &dir.path().join("trans"),
            small_config(),
        )
        .unwrap();
        index.put(b"fp1", b"loc1").unwrap();
        assert_eq!(index.delete(b"fp1").unwrap(), DeleteResult::Ok);
        assert_eq!(index.lookup(b"fp1").unwrap(), LookupResult::NotFound);
        assert_eq!(index.delete(b"fp1").unwrap(), DeleteResult::NotFound);
    }

    #[test]
    fn reopen_after_clean_close_preserves_data() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("data");
        let trans_path = dir.path().join("trans");
        {
            let index =
                DiskHashIndex::open(&data_path, &trans_path, small_config()).unwrap();
            index.put(b"fp1", b"loc1").unwrap();
        }
        let reopened = DiskHashIndex::open(&data_path, &trans_path, small_config()).unwrap();
        assert_eq!(
            reopened.lookup(b"fp1").unwrap(),
            LookupResult::Found(b"loc1".to_vec())
        );
    }

    #[test]
    fn torn_transaction_write_leaves_original_page_intact() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("data");
        let trans_path = dir.path().join("trans");
        let config = small_config();
        let index = DiskHashIndex::open(&data_path, &trans_path, config.clone()).unwrap();
        index.put(b"fp1", b"loc1").unwrap();

        // Simulate a torn transaction write: corrupt the transaction area's
        // trailing bytes so its CRC no longer matches transaction_crc.
        let bucket = index.bucket_of(b"fp2");
        let area = index.area_of(bucket);
        {
            let trans_file = index.trans_file.lock().unwrap();
            let mut garbage = vec![0xAAu8; config.page_size as usize];
            garbage[0] = 1; // pretend a bucket id is set
            trans_file
                .write_at(&garbage, index.area_offset(area))
                .unwrap();
        }
        drop(index);

        // Reopening must not panic or corrupt the existing page for fp1.
        let reopened = DiskHashIndex::open(&data_path, &trans_path, config).unwrap();
        assert_eq!(
            reopened.lookup(b"fp1").unwrap(),
            LookupResult::Found(b"loc1".to_vec())
        );
    }
}
