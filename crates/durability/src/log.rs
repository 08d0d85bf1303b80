//! Operation log facade tying segments, the writer, the reader, and the
//! replay-consumer registry together, plus dirty-shutdown detection
//! (spec §4.7, SPEC_FULL.md §11).

use crate::event::EventPayload;
use crate::reader::LogReader;
use crate::replay::{ConsumerRegistry, LogConsumer, ReplayMode};
use crate::writer::{LogWriter, DEFAULT_SEGMENT_SIZE};
use dedupfs_core::{LogId, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DIRTY_SENTINEL_NAME: &str = "DIRTY";

/// The append-only operation log: spec §4.7's "leaves first" leaf dependency
/// for everything else in the engine.
pub struct OperationLog {
    dir: PathBuf,
    writer: LogWriter,
    consumers: ConsumerRegistry,
    was_dirty_on_open: bool,
}

impl OperationLog {
    /// Open the log directory.
    ///
    /// If a `DIRTY` sentinel from a previous run is present, the previous
    /// shutdown was unclean: a `DirtyStart` replay pass runs over the whole
    /// log before this call returns, and every registered `DirtyStart`
    /// consumer sees every surviving record exactly once, in order.
    pub fn open(
        dir: PathBuf,
        consumers: ConsumerRegistry,
        segment_size: Option<u64>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let sentinel = dir.join(DIRTY_SENTINEL_NAME);
        let was_dirty = sentinel.exists();

        let writer = LogWriter::open(
            dir.clone(),
            segment_size.unwrap_or(DEFAULT_SEGMENT_SIZE),
            consumers.clone(),
        )?;

        if was_dirty {
            tracing::warn!("operation log: unclean shutdown detected, running dirty-start replay");
            let reader = LogReader::new(dir.clone(), Self::latest_segment_number(&dir));
            for record in reader.scan_all()? {
                consumers.dispatch(&record, ReplayMode::DirtyStart);
            }
        }

        // Mark the log dirty for the duration of this run; removed on clean close.
        std::fs::write(&sentinel, b"")?;

        Ok(Self {
            dir,
            writer,
            consumers,
            was_dirty_on_open: was_dirty,
        })
    }

    /// True if this run started from an unclean shutdown (dirty-start replay
    /// already ran by the time [`Self::open`] returned).
    pub fn was_dirty_on_open(&self) -> bool {
        self.was_dirty_on_open
    }

    /// Append an event, invoking `Direct` consumers synchronously.
    pub fn append(&self, payload: EventPayload) -> Result<LogId> {
        self.writer.append(payload)
    }

    /// Register an additional consumer after open. New consumers only see
    /// events appended from this point forward plus any future background
    /// replay; callers that need full-history visibility should register
    /// before [`Self::open`].
    pub fn register_consumer(&mut self, consumer: Arc<dyn LogConsumer>) {
        self.consumers.register(consumer);
    }

    /// Run a bounded background replay pass: re-scan the whole log and
    /// dispatch to `Background`-mode consumers. Rate-bounding (spec §4.7
    /// "bounded in rate") is the caller's responsibility — this call itself
    /// does one full pass.
    pub fn replay_background(&self) -> Result<usize> {
        let reader = LogReader::new(self.dir.clone(), Self::latest_segment_number(&self.dir));
        let records = reader.scan_all()?;
        for record in &records {
            self.consumers.dispatch(record, ReplayMode::Background);
        }
        Ok(records.len())
    }

    /// Highest log id assigned so far.
    pub fn last_log_id(&self) -> LogId {
        self.writer.last_log_id()
    }

    /// Graceful shutdown: flush the active segment and remove the dirty
    /// sentinel so the next open skips dirty-start replay.
    pub fn close(&self) -> Result<()> {
        self.writer.flush()?;
        let sentinel = self.dir.join(DIRTY_SENTINEL_NAME);
        if sentinel.exists() {
            std::fs::remove_file(&sentinel)?;
        }
        Ok(())
    }

    fn latest_segment_number(dir: &Path) -> u64 {
        std::fs::read_dir(dir)
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| name.strip_prefix("segment-").map(|s| s.to_string()))
            .filter_map(|s| s.parse::<u64>().ok())
            .max()
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogRecord;
    use dedupfs_core::VolumeId;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct Recorder {
        modes: Vec<ReplayMode>,
        seen: Mutex<Vec<LogId>>,
    }

    impl LogConsumer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn replay_modes(&self) -> &[ReplayMode] {
            &self.modes
        }
        fn consume(&self, record: &LogRecord, _ctx: crate::replay::LogReplayContext) {
            self.seen.lock().push(record.log_id);
        }
    }

    #[test]
    fn clean_shutdown_skips_dirty_replay_next_open() {
        let dir = tempdir().unwrap();
        {
            let log = OperationLog::open(dir.path().to_path_buf(), ConsumerRegistry::new(), None)
                .unwrap();
            log.append(EventPayload::VolumeAttach {
                volume: VolumeId(1),
            })
            .unwrap();
            log.close().unwrap();
        }
        let log =
            OperationLog::open(dir.path().to_path_buf(), ConsumerRegistry::new(), None).unwrap();
        assert!(!log.was_dirty_on_open());
    }

    #[test]
    fn unclean_shutdown_triggers_dirty_start_replay() {
        let dir = tempdir().unwrap();
        {
            let log = OperationLog::open(dir.path().to_path_buf(), ConsumerRegistry::new(), None)
                .unwrap();
            log.append(EventPayload::VolumeAttach {
                volume: VolumeId(1),
            })
            .unwrap();
            // No close() call: sentinel stays behind, simulating a crash.
        }

        let recorder = Arc::new(Recorder {
            modes: vec![ReplayMode::DirtyStart],
            seen: Mutex::new(Vec::new()),
        });
        let mut registry = ConsumerRegistry::new();
        registry.register(recorder.clone());

        let log = OperationLog::open(dir.path().to_path_buf(), registry, None).unwrap();
        assert!(log.was_dirty_on_open());
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn background_replay_dispatches_every_record_once_per_call() {
        let dir = tempdir().unwrap();
        let recorder = Arc::new(Recorder {
            modes: vec![ReplayMode::Background],
            seen: Mutex::new(Vec::new()),
        });
        let mut registry = ConsumerRegistry::new();
        registry.register(recorder.clone());

        let log = OperationLog::open(dir.path().to_path_buf(), registry, None).unwrap();
        log.append(EventPayload::VolumeAttach {
            volume: VolumeId(1),
        })
        .unwrap();
        log.append(EventPayload::VolumeAttach {
            volume: VolumeId(2),
        })
        .unwrap();

        let n = log.replay_background().unwrap();
        assert_eq!(n, 2);
        assert_eq!(recorder.seen.lock().len(), 2);
    }
}
