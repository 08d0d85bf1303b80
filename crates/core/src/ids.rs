//! Simple identifier newtypes used throughout the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a logical volume. Volume-to-block-id mapping itself is out of
/// scope (spec §1); the core only needs the id to scope block locks and the
/// `VolumeAttach`/`VolumeDetach` log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolumeId(pub u32);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vol{}", self.0)
    }
}

/// Identifies a logical block within the engine's flat block-id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// Monotonically increasing sequence number of an operation-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log#{}", self.0)
    }
}

impl LogId {
    /// The id before any record has been written.
    pub const ZERO: LogId = LogId(0);

    /// Next id in sequence.
    pub fn next(self) -> LogId {
        LogId(self.0 + 1)
    }
}
