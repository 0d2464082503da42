//! Cross-thread command queue and owner-thread pump.
//!
//! Session threads package work as an [`OwnerCall`] and hand it to
//! [`CommandQueue::submit`], then block in [`CommandQueue::await_result`]. The
//! owner context periodically calls [`OwnerThreadPump::pump`] with exclusive
//! access to its state; the pump drains the queue, runs each callable, and
//! stores the outcome in a write-once slot keyed by [`CallId`].
//!
//! ```text
//! session thread            CommandQueue                owner thread
//! ──────────────            ────────────                ────────────
//! submit(call) ───────────► pending: [call#7]
//! await_result(#7) ┐        slots: {#7: waiting}
//!                  │                            ◄────── pump(&mut state)
//!                  │        drain() ──────────────────► call#7(&mut state)
//!                  │        complete(#7, outcome) ◄────
//!                  └──────► outcome
//! ```
//!
//! The queue never runs callables itself, and the pump is the only component
//! that does.

mod call;
mod errors;
mod pump;
mod waker;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

pub use self::call::{CallId, CallResult, OwnerCall, PendingCall, owner_call};
pub use self::errors::CallError;
pub use self::pump::{OwnerThreadPump, PumpReport};
pub use self::waker::{NoopWaker, PumpSignal, Waker};

use self::call::CallSlot;

/// Tracing target for queue operations.
pub(crate) const QUEUE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::queue");

/// Thread-safe FIFO of pending owner-thread calls plus their result slots.
pub struct CommandQueue<S> {
    state: Mutex<QueueState<S>>,
    waker: Arc<dyn Waker>,
}

struct QueueState<S> {
    next_id: u64,
    pending: VecDeque<PendingCall<S>>,
    slots: HashMap<CallId, Arc<CallSlot>>,
    closed: bool,
}

impl<S> CommandQueue<S> {
    /// Creates an empty queue that raises `waker` on every submission.
    pub fn new(waker: Arc<dyn Waker>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: 1,
                pending: VecDeque::new(),
                slots: HashMap::new(),
                closed: false,
            }),
            waker,
        }
    }

    /// Enqueues a callable under a fresh identifier. Never blocks on the
    /// owner thread.
    ///
    /// Every returned id must be passed to [`CommandQueue::await_result`];
    /// until then its result slot stays allocated. [`CommandQueue::call`]
    /// pairs the two.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Closed`] once [`CommandQueue::close`] has run.
    pub fn submit(&self, callable: OwnerCall<S>) -> Result<CallId, CallError> {
        let mut state = self.lock();
        if state.closed {
            return Err(CallError::Closed);
        }
        let id = CallId::new(state.next_id);
        state.next_id = state.next_id.wrapping_add(1);
        state.slots.insert(id, Arc::new(CallSlot::default()));
        state.pending.push_back(PendingCall::new(id, callable));
        let depth = state.pending.len();
        drop(state);

        debug!(target: QUEUE_TARGET, call = %id, depth, "call submitted");
        self.waker.wake();
        Ok(id)
    }

    /// Removes and returns every queued call in submission order.
    ///
    /// Intended for the owner thread only; an empty result is a valid no-op.
    pub fn drain(&self) -> Vec<PendingCall<S>> {
        self.lock().pending.drain(..).collect()
    }

    /// Stores the outcome for `id` and wakes its waiter.
    ///
    /// Outcomes for calls whose waiter has already given up are discarded.
    pub fn complete(&self, id: CallId, outcome: CallResult) {
        let slot = self.lock().slots.get(&id).cloned();
        match slot {
            Some(slot) => {
                if !slot.fill(outcome) {
                    warn!(target: QUEUE_TARGET, call = %id, "call completed twice; keeping first outcome");
                }
            }
            None => {
                debug!(target: QUEUE_TARGET, call = %id, "discarding outcome for abandoned call");
            }
        }
    }

    /// Blocks until the call completes, then removes and returns its outcome.
    ///
    /// With `timeout` set, gives up after that long and abandons the slot;
    /// the callable may still run later but its outcome is dropped.
    ///
    /// # Errors
    ///
    /// Returns the callable's own error, [`CallError::TimedOut`] when the
    /// bound elapses, [`CallError::Closed`] when the queue is closed first, or
    /// [`CallError::UnknownCall`] when the outcome was already harvested.
    pub fn await_result(&self, id: CallId, timeout: Option<Duration>) -> CallResult {
        let slot = {
            let state = self.lock();
            match state.slots.get(&id) {
                Some(slot) => Arc::clone(slot),
                None if state.closed => return Err(CallError::Closed),
                None => return Err(CallError::UnknownCall { id }),
            }
        };

        let outcome = slot.wait(timeout);
        self.lock().slots.remove(&id);

        match outcome.or_else(|| slot.try_take()) {
            Some(outcome) => outcome,
            None => {
                let timeout = timeout.unwrap_or_default();
                warn!(
                    target: QUEUE_TARGET,
                    call = %id,
                    timeout_ms = timeout.as_millis(),
                    "owner thread did not complete call in time"
                );
                Err(CallError::TimedOut { id, timeout })
            }
        }
    }

    /// Submits a callable and waits for its outcome.
    ///
    /// # Errors
    ///
    /// See [`CommandQueue::submit`] and [`CommandQueue::await_result`].
    pub fn call(&self, callable: OwnerCall<S>, timeout: Option<Duration>) -> CallResult {
        let id = self.submit(callable)?;
        self.await_result(id, timeout)
    }

    /// Rejects further submissions and fails every outstanding call with
    /// [`CallError::Closed`]. Queued callables are dropped unexecuted and all
    /// result slots are released.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        let slots: Vec<Arc<CallSlot>> = state.slots.drain().map(|(_, slot)| slot).collect();
        drop(state);

        for slot in slots {
            slot.fill(Err(CallError::Closed));
        }
        debug!(target: QUEUE_TARGET, dropped, "command queue closed");
    }

    /// Returns whether [`CommandQueue::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of calls waiting for the next pump.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> fmt::Debug for CommandQueue<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        formatter
            .debug_struct("CommandQueue")
            .field("pending", &state.pending.len())
            .field("in_flight", &state.slots.len())
            .field("closed", &state.closed)
            .finish()
    }
}
