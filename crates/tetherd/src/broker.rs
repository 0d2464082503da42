//! Facade wiring the queue, dispatch, and lifecycle together.

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tether_config::Config;

use crate::dispatch::{DispatchConnectionHandler, HandlerTable, SessionOptions};
use crate::lifecycle::{LifecycleError, LifecycleState, ServerLifecycle};
use crate::notifier::Notifier;
use crate::queue::{CommandQueue, OwnerThreadPump, Waker};

/// Broker tuning derived from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerOptions {
    /// Limits applied to every session.
    pub session: SessionOptions,
    /// Concurrent session cap; `None` is unbounded.
    pub max_connections: Option<NonZeroUsize>,
}

impl BrokerOptions {
    /// Reads the broker settings out of a resolved configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            session: SessionOptions {
                await_timeout: config.await_timeout(),
                max_request_bytes: config.max_request_bytes(),
            },
            max_connections: config.max_connections(),
        }
    }
}

/// Thread-confined command broker for owner state `S`.
///
/// Construction hands back the [`OwnerThreadPump`] that the host must call
/// from its owner context; the broker never runs callables itself.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use serde_json::json;
/// use tetherd::{Broker, BrokerOptions, Command, HandlerTable, Notifier, PumpSignal, owner_call};
///
/// let handlers = HandlerTable::new().with("increment", |_command: Command| {
///     Ok(owner_call(|count: &mut u64| {
///         *count += 1;
///         Ok(json!(*count))
///     }))
/// });
/// let signal = Arc::new(PumpSignal::new());
/// let (notifier, _inbox) = Notifier::channel(signal.clone());
/// let (broker, pump) = Broker::new(handlers, notifier, signal, BrokerOptions::default());
/// broker.start("127.0.0.1", 5555)?;
///
/// let mut count = 0_u64;
/// pump.pump(&mut count);
/// # Ok::<(), tetherd::LifecycleError>(())
/// ```
pub struct Broker<S> {
    queue: Arc<CommandQueue<S>>,
    lifecycle: ServerLifecycle,
}

impl<S: 'static> Broker<S> {
    /// Builds a stopped broker and the pump for its owner context.
    ///
    /// `waker` is raised on every submission so the host can pump promptly.
    pub fn new(
        handlers: HandlerTable<S>,
        notifier: Notifier,
        waker: Arc<dyn Waker>,
        options: BrokerOptions,
    ) -> (Self, OwnerThreadPump<S>) {
        let queue = Arc::new(CommandQueue::new(waker));
        let handler = Arc::new(DispatchConnectionHandler::new(
            handlers,
            Arc::clone(&queue),
            options.session,
        ));
        let lifecycle = ServerLifecycle::new(handler, notifier, options.max_connections);
        let pump = OwnerThreadPump::new(Arc::clone(&queue));
        (Self { queue, lifecycle }, pump)
    }
}

impl<S> Broker<S> {
    /// Starts listening on `host:port`.
    ///
    /// # Errors
    ///
    /// See [`ServerLifecycle::start`].
    pub fn start(&self, host: &str, port: u16) -> Result<SocketAddr, LifecycleError> {
        self.lifecycle.start(host, port)
    }

    /// Stops listening; queued work is kept for the next pump.
    pub fn stop(&self) {
        self.lifecycle.stop();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    /// Queue shared with the sessions and the pump.
    pub fn queue(&self) -> &Arc<CommandQueue<S>> {
        &self.queue
    }

    /// Stops listening and closes the queue, failing every waiting session
    /// with [`CallError::Closed`](crate::queue::CallError::Closed).
    ///
    /// Use this when the owner context is going away for good.
    pub fn shutdown(&self) {
        self.lifecycle.stop();
        self.queue.close();
    }
}

impl<S> fmt::Debug for Broker<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Broker")
            .field("lifecycle", &self.lifecycle)
            .field("queue", &self.queue)
            .finish()
    }
}

impl<S> Drop for Broker<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
