//! Pending calls and their single-shot result slots.

use std::fmt;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use super::errors::CallError;

/// Outcome of executing a callable on the owner thread.
pub type CallResult = Result<Value, CallError>;

/// Work packaged for the owner thread.
///
/// The callable receives exclusive access to the owner state; it is the only
/// way domain state is ever reached.
pub type OwnerCall<S> = Box<dyn FnOnce(&mut S) -> CallResult + Send + 'static>;

/// Boxes a closure as an [`OwnerCall`].
pub fn owner_call<S, F>(call: F) -> OwnerCall<S>
where
    F: FnOnce(&mut S) -> CallResult + Send + 'static,
{
    Box::new(call)
}

/// Identifier correlating a submitted call with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// A call drained from the queue and awaiting execution.
pub struct PendingCall<S> {
    id: CallId,
    callable: OwnerCall<S>,
}

impl<S> PendingCall<S> {
    pub(crate) fn new(id: CallId, callable: OwnerCall<S>) -> Self {
        Self { id, callable }
    }

    /// Identifier assigned at submission.
    #[must_use]
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Splits the call into its identifier and callable.
    #[must_use]
    pub fn into_parts(self) -> (CallId, OwnerCall<S>) {
        (self.id, self.callable)
    }
}

impl<S> fmt::Debug for PendingCall<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PendingCall")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Write-once result slot paired with a completion signal.
#[derive(Debug, Default)]
pub(crate) struct CallSlot {
    outcome: Mutex<SlotState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Waiting,
    Ready(CallResult),
    Harvested,
}

impl CallSlot {
    /// Stores the outcome and wakes the waiter. Returns `false` when the slot
    /// was already filled.
    pub(crate) fn fill(&self, outcome: CallResult) -> bool {
        let mut state = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, SlotState::Waiting) {
            return false;
        }
        *state = SlotState::Ready(outcome);
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Blocks until the slot is filled, or until `timeout` elapses.
    ///
    /// Returns `None` on timeout. The outcome is handed out once; later calls
    /// report [`CallError::UnknownCall`] through the caller.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<CallResult> {
        let guard = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let is_waiting = |state: &mut SlotState| matches!(state, SlotState::Waiting);
        let mut state = match timeout {
            Some(limit) => {
                let (guard, _) = self
                    .ready
                    .wait_timeout_while(guard, limit, is_waiting)
                    .unwrap_or_else(PoisonError::into_inner);
                guard
            }
            None => self
                .ready
                .wait_while(guard, is_waiting)
                .unwrap_or_else(PoisonError::into_inner),
        };
        Self::harvest(&mut state)
    }

    /// Takes a ready outcome without blocking.
    pub(crate) fn try_take(&self) -> Option<CallResult> {
        let mut state = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        Self::harvest(&mut state)
    }

    fn harvest(state: &mut SlotState) -> Option<CallResult> {
        match std::mem::replace(state, SlotState::Harvested) {
            SlotState::Ready(outcome) => Some(outcome),
            SlotState::Waiting => {
                *state = SlotState::Waiting;
                None
            }
            SlotState::Harvested => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;

    use super::*;

    #[test]
    fn slot_is_written_once() {
        let slot = CallSlot::default();
        assert!(slot.fill(Ok(json!(1))));
        assert!(!slot.fill(Ok(json!(2))));
        assert_eq!(slot.try_take(), Some(Ok(json!(1))));
    }

    #[test]
    fn slot_hands_out_outcome_once() {
        let slot = CallSlot::default();
        slot.fill(Ok(json!("done")));
        assert!(slot.wait(Some(Duration::from_millis(10))).is_some());
        assert!(slot.try_take().is_none());
        assert!(!slot.fill(Ok(json!("again"))), "harvested slot stays sealed");
    }

    #[test]
    fn wait_times_out_on_empty_slot() {
        let slot = CallSlot::default();
        assert!(slot.wait(Some(Duration::from_millis(20))).is_none());
        assert!(slot.fill(Ok(json!(null))), "timed-out slot can still be filled");
    }

    #[test]
    fn wait_wakes_when_filled_from_another_thread() {
        let slot = Arc::new(CallSlot::default());
        let filler = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            filler.fill(Err(CallError::failed("boom")));
        });
        let outcome = slot.wait(None).expect("outcome should arrive");
        assert_eq!(outcome, Err(CallError::failed("boom")));
        handle.join().expect("join filler");
    }
}
