//! Idle detection (spec §5, SPEC_FULL.md §11): a pub/sub registry that
//! background workers (the block index importer, the container committer)
//! can subscribe to in order to run extra work — merging small containers,
//! flushing write-back caches harder — only when the foreground request path
//! has gone quiet.
//!
//! Grounded on the callback-registration shape exercised by
//! `dedupv1d/unit_test/idle_monitor_test.cc`: listeners register once, and
//! are notified on every idle/busy transition, not just the first.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives idle/busy transition notifications.
pub trait IdleListener: Send + Sync {
    /// Called when the system transitions from busy to idle.
    fn on_idle_start(&self);
    /// Called when the system transitions from idle to busy.
    fn on_idle_end(&self);
}

/// Broadcasts idle/busy transitions to registered listeners.
pub struct IdleDetector {
    listeners: Mutex<Vec<Arc<dyn IdleListener>>>,
    idle: AtomicBool,
}

impl Default for IdleDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleDetector {
    /// A detector that starts in the busy state.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            idle: AtomicBool::new(false),
        }
    }

    /// Subscribe to future transitions. Does not fire for the current state.
    pub fn register(&self, listener: Arc<dyn IdleListener>) {
        self.listeners.lock().push(listener);
    }

    /// Mark the system idle, notifying listeners if this is a new
    /// transition. A no-op if already idle.
    pub fn mark_idle(&self) {
        if self.idle.swap(true, Ordering::SeqCst) {
            return;
        }
        for listener in self.listeners.lock().iter() {
            listener.on_idle_start();
        }
    }

    /// Mark the system busy, notifying listeners if this is a new
    /// transition. A no-op if already busy.
    pub fn mark_busy(&self) {
        if !self.idle.swap(false, Ordering::SeqCst) {
            return;
        }
        for listener in self.listeners.lock().iter() {
            listener.on_idle_end();
        }
    }

    /// Current state.
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
}
