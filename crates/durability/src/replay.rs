//! Replay framework: consumer registration and replay-mode dispatch
//! (spec §4.7).
//!
//! Three replay modes exist:
//! - **Direct** — invoked synchronously by the producer when an event is
//!   logged.
//! - **DirtyStart** — invoked once at startup if the previous shutdown was
//!   unclean.
//! - **Background** — periodic replay for bookkeeping, rate-bounded.
//!
//! Consumers must be idempotent across Direct and Background replay of the
//! same event; they distinguish the two via [`LogReplayContext::replay_mode`].

use crate::record::LogRecord;
use std::sync::Arc;

/// Which pass is invoking a consumer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Synchronous invocation by the logger thread, at log time.
    Direct,
    /// Full scan performed once at startup after an unclean shutdown.
    DirtyStart,
    /// Periodic background bookkeeping replay.
    Background,
}

/// Context passed to every consumer invocation.
#[derive(Debug, Clone, Copy)]
pub struct LogReplayContext {
    /// Which replay pass is calling.
    pub replay_mode: ReplayMode,
}

impl LogReplayContext {
    /// Build a context for the given mode.
    pub fn new(replay_mode: ReplayMode) -> Self {
        Self { replay_mode }
    }
}

/// A registered consumer of operation-log events.
///
/// Implementors declare which replay modes they participate in via
/// [`LogConsumer::replay_modes`]; the log only invokes `consume` for modes
/// the consumer opted into.
pub trait LogConsumer: Send + Sync {
    /// Human-readable name, used for registration and diagnostics.
    fn name(&self) -> &str;

    /// Replay modes this consumer wants to be invoked for.
    fn replay_modes(&self) -> &[ReplayMode];

    /// Handle one record. Must tolerate being called more than once for the
    /// same `log_id` across Direct and Background replay.
    fn consume(&self, record: &LogRecord, ctx: LogReplayContext);
}

/// Registry of consumers, dispatched to in registration order.
#[derive(Default, Clone)]
pub struct ConsumerRegistry {
    consumers: Vec<Arc<dyn LogConsumer>>,
}

impl ConsumerRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
        }
    }

    /// Register a consumer.
    pub fn register(&mut self, consumer: Arc<dyn LogConsumer>) {
        self.consumers.push(consumer);
    }

    /// Dispatch `record` to every consumer that participates in `mode`.
    pub fn dispatch(&self, record: &LogRecord, mode: ReplayMode) {
        let ctx = LogReplayContext::new(mode);
        for consumer in &self.consumers {
            if consumer.replay_modes().contains(&mode) {
                consumer.consume(record, ctx);
            }
        }
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// True if no consumers are registered.
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}
