//! Uniform key-value index abstraction (spec §4.1).
//!
//! A single trait fronts every concrete backend (disk B-tree, disk hash,
//! fixed-width ID-keyed store, …); capability flags tell callers which
//! optional operations a given backend actually supports, mirroring the
//! spec's "replace virtual-inheritance index hierarchy with a capability
//! trait" redesign note (spec §9).

use bitflags::bitflags;
use dedupfs_core::Result;

bitflags! {
    /// Optional capabilities a backend may advertise.
    pub struct Capabilities: u16 {
        /// `item_count()` reflects persisted (not just in-memory) state.
        const PERSISTENT_ITEM_COUNT = 1 << 0;
        /// `create_iterator()` is supported.
        const HAS_ITERATOR = 1 << 1;
        /// Backend supports the write-back cache operations.
        const WRITE_BACK_CACHE = 1 << 2;
        /// `delete()` distinguishes "deleted" from "was already absent".
        const RETURNS_DELETE_NOT_FOUND = 1 << 3;
        /// `put_batch()`/`raw_put_batch()` use a native bulk path.
        const NATIVE_BATCH_OPS = 1 << 4;
        /// `compare_and_swap()` is supported.
        const COMPARE_AND_SWAP = 1 << 5;
        /// `put_if_absent()` is supported.
        const PUT_IF_ABSENT = 1 << 6;
        /// Cursor-style raw access is supported (single-file backends only).
        const RAW_ACCESS = 1 << 7;
    }
}

/// Result of [`KvIndex::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult<V> {
    /// The key was present.
    Found(V),
    /// The key was absent.
    NotFound,
}

impl<V> LookupResult<V> {
    /// Convert into `Option<V>`, the common case for callers that don't care
    /// about the distinction.
    pub fn into_option(self) -> Option<V> {
        match self {
            LookupResult::Found(v) => Some(v),
            LookupResult::NotFound => None,
        }
    }

    /// True if the key was found.
    pub fn is_found(&self) -> bool {
        matches!(self, LookupResult::Found(_))
    }
}

/// Result of [`KvIndex::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutResult {
    /// The value was written.
    Ok,
    /// An identical value was already present; backend elided the write.
    Keep,
}

/// Result of [`KvIndex::put_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutIfAbsentResult {
    /// The key was absent and the value was written.
    Ok,
    /// The key was already present; nothing was written.
    AlreadyExists,
}

/// Result of [`KvIndex::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult<V> {
    /// The expected value matched; the swap happened.
    Ok,
    /// The expected value did not match; `actual` is what was really there.
    Keep(Option<V>),
}

/// Result of [`KvIndex::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteResult {
    /// The key was present and removed.
    Ok,
    /// The key was not present (only distinguishable when the backend
    /// advertises [`Capabilities::RETURNS_DELETE_NOT_FOUND`]).
    NotFound,
}

/// Uniform interface over a key-value index backend.
///
/// Keys and values are opaque byte strings; higher layers (metadata index,
/// chunk index, block index, bitmap allocator) own their own (de)serialization.
pub trait KvIndex: Send + Sync {
    /// Capabilities this backend advertises.
    fn capabilities(&self) -> Capabilities;

    /// Look up a key.
    fn lookup(&self, key: &[u8]) -> Result<LookupResult<Vec<u8>>>;

    /// Write `key -> value`, overwriting any existing value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<PutResult>;

    /// Write `key -> value` only if `key` is currently absent.
    ///
    /// Returns `Err(Error::Internal(..))` if the backend lacks
    /// [`Capabilities::PUT_IF_ABSENT`].
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<PutIfAbsentResult> {
        let _ = (key, value);
        Err(dedupfs_core::Error::Internal(
            "backend does not support put_if_absent".into(),
        ))
    }

    /// Swap `key`'s value to `new` iff its current value equals `expected`.
    ///
    /// Returns `Err(Error::Internal(..))` if the backend lacks
    /// [`Capabilities::COMPARE_AND_SWAP`].
    fn compare_and_swap(
        &self,
        key: &[u8],
        new: &[u8],
        expected: &[u8],
    ) -> Result<CasResult<Vec<u8>>> {
        let _ = (key, new, expected);
        Err(dedupfs_core::Error::Internal(
            "backend does not support compare_and_swap".into(),
        ))
    }

    /// Remove a key.
    fn delete(&self, key: &[u8]) -> Result<DeleteResult>;

    /// Write many entries in one call.
    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (k, v) in entries {
            self.put(k, v)?;
        }
        Ok(())
    }

    /// Number of entries currently stored (semantics depend on
    /// [`Capabilities::PERSISTENT_ITEM_COUNT`]).
    fn item_count(&self) -> u64;

    /// Snapshot every `(key, value)` pair, best-effort: a concurrent write
    /// during iteration may be missed or duplicated, but never produces a
    /// torn single entry.
    fn create_iterator(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Err(dedupfs_core::Error::Internal(
            "backend does not support iteration".into(),
        ))
    }
}
