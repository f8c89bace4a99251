//! Replay drain gate and cancellation token
//!
//! Certification must not start while a replay is in flight. Waiters
//! re-check on a bounded interval so that a wakeup lost between the
//! BF-abort signal and wait registration costs one poll interval, not a
//! hang.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::commit::{WsrepError, WsrepResult};

/// Shared stop flag for waits and background threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Count of replays in progress.
///
/// A single coarse lock; replays are rare.
#[derive(Debug)]
pub struct ReplayGate {
    active: Mutex<u32>,
    cond: Condvar,
    poll: Duration,
}

impl ReplayGate {
    pub fn new(poll: Duration) -> Self {
        Self {
            active: Mutex::new(0),
            cond: Condvar::new(),
            poll,
        }
    }

    /// A transaction was scheduled for replay.
    pub fn enter(&self) {
        *self.active.lock() += 1;
    }

    /// A scheduled replay finished, successfully or not.
    pub fn leave(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        self.cond.notify_all();
    }

    pub fn active(&self) -> u32 {
        *self.active.lock()
    }

    /// Wake every drain waiter so it re-checks its stop condition.
    pub fn wake(&self) {
        self.cond.notify_all();
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Block until no replay is in progress.
    ///
    /// `stop` is evaluated on every re-check without the gate lock held;
    /// when it returns true the wait ends early and the caller inspects
    /// its own state.
    pub fn wait_drained(&self, cancel: &CancelToken, mut stop: impl FnMut() -> bool) -> WsrepResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(WsrepError::Interrupted);
            }
            if stop() {
                return Ok(());
            }
            let mut active = self.active.lock();
            if *active == 0 {
                return Ok(());
            }
            self.cond.wait_for(&mut active, self.poll);
        }
    }
}
