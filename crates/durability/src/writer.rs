//! Operation-log writer: a single append lock serializing all producers,
//! with segment rotation (spec §4.7, §5 "log append lock").

use crate::event::EventPayload;
use crate::record::LogRecord;
use crate::replay::{ConsumerRegistry, ReplayMode};
use crate::segment::LogSegment;
use dedupfs_core::{Error, LogId, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Default segment size before rotation.
pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

struct WriterState {
    segment: LogSegment,
    segment_number: u64,
    next_log_id: u64,
}

/// Appends records to the operation log and, for `Direct`-mode consumers,
/// invokes them synchronously before returning to the caller.
pub struct LogWriter {
    dir: PathBuf,
    segment_size: u64,
    state: Mutex<WriterState>,
    consumers: ConsumerRegistry,
}

impl LogWriter {
    /// Open (or create) the log directory and position the writer at the end
    /// of the latest segment, ready to append.
    pub fn open(dir: PathBuf, segment_size: u64, consumers: ConsumerRegistry) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let latest = Self::find_latest_segment(&dir);
        let (segment, segment_number) = match latest {
            Some(num) => match LogSegment::open_append(&dir, num) {
                Ok(seg) => (seg, num),
                Err(_) => {
                    let new_num = num + 1;
                    (LogSegment::create(&dir, new_num)?, new_num)
                }
            },
            None => (LogSegment::create(&dir, 1)?, 1),
        };

        let next_log_id = Self::recover_next_log_id(&dir, segment_number)?;

        Ok(Self {
            dir,
            segment_size,
            state: Mutex::new(WriterState {
                segment,
                segment_number,
                next_log_id,
            }),
            consumers,
        })
    }

    /// Append `payload`, dispatch it to `Direct` consumers, and return the
    /// log id it was assigned.
    ///
    /// Fsyncs before returning: spec §5 requires that "a container is marked
    /// committed to external observers ... only after its data is fsynced",
    /// and more generally that direct-replay consumers never observe an
    /// event that a crash could subsequently erase.
    pub fn append(&self, payload: EventPayload) -> Result<LogId> {
        let mut state = self.state.lock();
        let log_id = LogId(state.next_log_id);
        let record = LogRecord::new(log_id, payload);
        let bytes = record
            .to_bytes()
            .map_err(|e| Error::Internal(format!("failed to encode log record: {e}")))?;

        if state.segment.size() + bytes.len() as u64 > self.segment_size {
            Self::rotate(&self.dir, &mut state)?;
        }

        state.segment.write(&bytes)?;
        state.segment.sync()?;
        state.next_log_id += 1;

        self.consumers.dispatch(&record, ReplayMode::Direct);

        Ok(log_id)
    }

    /// Force the active segment to disk (used during graceful shutdown).
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.segment.sync()?;
        Ok(())
    }

    /// Highest log id that has been assigned (the next append will use this
    /// value plus one).
    pub fn last_log_id(&self) -> LogId {
        let state = self.state.lock();
        LogId(state.next_log_id.saturating_sub(1))
    }

    fn rotate(dir: &Path, state: &mut WriterState) -> Result<()> {
        state.segment.close()?;
        state.segment_number += 1;
        state.segment = LogSegment::create(dir, state.segment_number)?;
        Ok(())
    }

    fn find_latest_segment(dir: &Path) -> Option<u64> {
        let entries = std::fs::read_dir(dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| name.strip_prefix("segment-").map(|s| s.to_string()))
            .filter_map(|num_str| num_str.parse::<u64>().ok())
            .max()
    }

    /// Scan every existing segment to find the next unused log id, so a
    /// restart never reuses an id (used when no index already tracks it).
    fn recover_next_log_id(dir: &Path, latest_segment: u64) -> Result<u64> {
        use crate::reader::LogReader;
        let mut max_seen: Option<u64> = None;
        let reader = LogReader::new(dir.to_path_buf(), latest_segment);
        for record in reader.scan_all()? {
            max_seen = Some(max_seen.map_or(record.log_id.0, |m| m.max(record.log_id.0)));
        }
        Ok(max_seen.map(|m| m + 1).unwrap_or(0))
    }
}
