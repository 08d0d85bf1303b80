//! Contracts for collaborators spec §1 names but deliberately leaves
//! unspecified: chunking, fingerprint hashing, and compression.
//!
//! The engine depends only on these trait objects; concrete chunkers,
//! hashers, and codecs are injected by the caller (the iSCSI front end in the
//! full system, a test harness here).

use crate::fingerprint::Fingerprint;

/// Produces a fingerprint for a chunk's bytes. Out of scope per spec §1 — the
/// core only needs *a* fingerprint, not how it is computed.
pub trait Fingerprinter: Send + Sync {
    /// Compute the fingerprint of `data`.
    fn fingerprint(&self, data: &[u8]) -> Fingerprint;
}

/// Compresses/decompresses chunk payloads before/after they are packed into a
/// container (spec §4.2 `AddItem`/`CopyRawData`). Out of scope per spec §1;
/// the default `NoopCompressor` matches "fall back to uncompressed" when no
/// real codec is configured.
pub trait Compressor: Send + Sync {
    /// A stable identifier for this codec, stored as `compression_kind` in
    /// each item's on-disk record.
    fn kind(&self) -> u8;

    /// Compress `data`, or return `None` if compression would not help (the
    /// caller is responsible for the "compressed size >= raw size" fallback
    /// named in spec §4.2).
    fn compress(&self, data: &[u8]) -> Option<Vec<u8>>;

    /// Decompress bytes previously produced by [`Self::compress`].
    fn decompress(&self, data: &[u8], original_size: usize) -> Vec<u8>;
}

/// No-op codec: `kind() == 0`, never compresses. The engine's default when no
/// real compressor is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn kind(&self) -> u8 {
        0
    }

    fn compress(&self, _data: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn decompress(&self, data: &[u8], _original_size: usize) -> Vec<u8> {
        data.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_compressor_never_compresses() {
        let c = NoopCompressor;
        assert_eq!(c.kind(), 0);
        assert!(c.compress(b"hello world").is_none());
        assert_eq!(c.decompress(b"hello world", 11), b"hello world");
    }
}
