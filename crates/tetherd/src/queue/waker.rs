//! Wake-up primitives used to request an out-of-band pump.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Asks the owner context to run soon.
///
/// Implementations must be callable from any thread and must not block.
pub trait Waker: Send + Sync {
    /// Signals that work is waiting.
    fn wake(&self);
}

impl<T> Waker for Arc<T>
where
    T: Waker + ?Sized,
{
    fn wake(&self) {
        (**self).wake();
    }
}

/// Waker for hosts that rely on periodic polling alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWaker;

impl Waker for NoopWaker {
    fn wake(&self) {}
}

/// Latching signal a host loop can sleep on between pumps.
///
/// A wake raised while nobody waits is remembered until the next
/// [`PumpSignal::wait_timeout`].
#[derive(Debug, Default)]
pub struct PumpSignal {
    raised: Mutex<bool>,
    changed: Condvar,
}

impl PumpSignal {
    /// Creates a lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps until the signal is raised or `timeout` elapses, then lowers it.
    ///
    /// Returns `true` when woken by a raise rather than the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut raised, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *raised, false)
    }
}

impl Waker for PumpSignal {
    fn wake(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        drop(raised);
        self.changed.notify_all();
    }
}
