//! Owner-thread pump that executes queued calls.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CallError, CallResult, CommandQueue, OwnerCall, QUEUE_TARGET};

/// Summary of a single pump cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    /// Calls executed during the cycle.
    pub executed: usize,
    /// Executed calls whose outcome was an error.
    pub failed: usize,
}

/// Drains a [`CommandQueue`] on behalf of the owner context.
///
/// The pump is the only component that executes callables. It is not `Sync`;
/// keep it on the owner thread and call [`OwnerThreadPump::pump`] from there.
pub struct OwnerThreadPump<S> {
    queue: Arc<CommandQueue<S>>,
    active: Cell<bool>,
}

impl<S> OwnerThreadPump<S> {
    /// Creates a pump over `queue`.
    pub fn new(queue: Arc<CommandQueue<S>>) -> Self {
        Self {
            queue,
            active: Cell::new(false),
        }
    }

    /// Queue this pump drains.
    pub fn queue(&self) -> &Arc<CommandQueue<S>> {
        &self.queue
    }

    /// Executes every call queued at the moment of invocation.
    ///
    /// Calls submitted while the cycle runs wait for the next invocation, which
    /// bounds the length of one cycle. A nested invocation made while a cycle
    /// is in progress returns an empty report.
    pub fn pump(&self, state: &mut S) -> PumpReport {
        if self.active.replace(true) {
            debug!(target: QUEUE_TARGET, "nested pump ignored");
            return PumpReport::default();
        }
        let _active = ActiveGuard(&self.active);

        let mut report = PumpReport::default();
        for call in self.queue.drain() {
            let (id, callable) = call.into_parts();
            let outcome = execute(callable, state);
            report.executed += 1;
            if let Err(error) = &outcome {
                report.failed += 1;
                debug!(target: QUEUE_TARGET, call = %id, %error, "call failed");
            }
            self.queue.complete(id, outcome);
        }
        report
    }
}

struct ActiveGuard<'a>(&'a Cell<bool>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn execute<S>(callable: OwnerCall<S>, state: &mut S) -> CallResult {
    match panic::catch_unwind(AssertUnwindSafe(|| callable(state))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(target: QUEUE_TARGET, %message, "callable panicked on the owner thread");
            Err(CallError::Panicked { message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        String::from("unknown panic payload")
    }
}
