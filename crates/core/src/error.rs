//! Unified error type for the dedupfs core.
//!
//! Every variant maps 1:1 onto an error *kind* named in spec §7 — callers
//! match on the kind that is relevant to the operation they invoked, not on
//! an opaque code.

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for dedupfs operations.
#[derive(Debug, Error)]
pub enum Error {
    /// API called before `Start`.
    #[error("engine not started")]
    NotStarted,

    /// Invalid option name/value, or an incompatible option combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Read/write/fsync/stat/mkdir/chmod/chown failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checksum mismatch, out-of-range offset, id-verification failure, or
    /// unparseable record.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Container storage, block index auxiliary, or allocator has no room.
    #[error("no capacity remaining: {0}")]
    Full(String),

    /// Lookup missed where the caller expected a hit.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional insert saw an existing key.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Hard-limit wait timed out or was interrupted.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Iterator observed a concurrent modification.
    #[error("concurrent modification detected: {0}")]
    ConcurrentModification(String),

    /// Invariant violation — a bug, not a recoverable condition.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// True for error kinds a caller may reasonably retry (spec §7's
    /// background-worker "log and continue" policy relies on this).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Throttled(_) | Error::ConcurrentModification(_))
    }

    /// True for error kinds that should escalate to a shutdown request
    /// rather than be logged and continued past (spec §7).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::Internal(_))
    }
}
