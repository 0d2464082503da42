//! Optional cap on concurrently open sessions.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts open sessions against a fixed maximum.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionLimit {
    active: Arc<AtomicUsize>,
    max: NonZeroUsize,
}

impl ConnectionLimit {
    pub(crate) fn new(max: NonZeroUsize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Reserves a session slot, or returns `None` when the cap is reached.
    pub(crate) fn try_acquire(&self) -> Option<ConnectionPermit> {
        let max = self.max.get();
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < max).then_some(active + 1)
            })
            .ok()
            .map(|_| ConnectionPermit {
                active: Arc::clone(&self.active),
            })
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) const fn max(&self) -> usize {
        self.max.get()
    }
}

/// Session slot released on drop.
#[derive(Debug)]
pub(crate) struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
