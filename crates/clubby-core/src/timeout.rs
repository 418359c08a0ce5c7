//! One-shot timers for call deadlines.
//!
//! Cancellation only stops the timer task. Whether a late firing still has an
//! effect is decided by the pending-call registry: the timer and the response
//! path both try to pop the same entry, and only the winner acts.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Spawns deadline timers on a tokio runtime.
#[derive(Clone, Debug)]
pub struct TimeoutScheduler {
    runtime: Handle,
}

impl TimeoutScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler bound to the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Run `on_fire` once, no earlier than `after` from now, unless cancelled.
    pub fn arm<F>(&self, after: Duration, on_fire: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_fire();
        });
        TimerHandle {
            abort: task.abort_handle(),
        }
    }
}

/// Handle to an armed timer.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Stop the timer. Idempotent, and a no-op once it has fired.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
