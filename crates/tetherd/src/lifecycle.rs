//! Start/stop state machine around the socket listener.
//!
//! ```text
//! Stopped --start()--> Running --stop() or fatal accept error--> Stopped
//! ```
//!
//! Every transition is reported to the observer through the [`Notifier`];
//! a fatal accept error is reported by the accept loop itself, so a later
//! `stop()` does not announce the same transition twice.

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::notifier::{Notifier, ServerStatus};
use crate::transport::{
    ConnectionHandler, ConnectionLimit, ListenerError, ListenerHandle, SocketListener,
};

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Observable server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No listener is accepting connections.
    Stopped,
    /// The listening socket is open and the accept loop is active.
    Running,
}

/// Errors reported by lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `start` was called while a listener is already accepting.
    #[error("server is already running on {addr}")]
    AlreadyRunning {
        /// Address of the active listener.
        addr: SocketAddr,
    },
    /// Binding or spawning the listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Owns at most one listener and reports its transitions.
pub struct ServerLifecycle {
    handler: Arc<dyn ConnectionHandler>,
    notifier: Notifier,
    limit: Option<ConnectionLimit>,
    slot: Mutex<Option<ListenerHandle>>,
}

impl ServerLifecycle {
    /// Creates a stopped lifecycle serving connections with `handler`.
    ///
    /// `max_connections` caps concurrent sessions; `None` leaves them
    /// unbounded.
    pub fn new(
        handler: Arc<dyn ConnectionHandler>,
        notifier: Notifier,
        max_connections: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            handler,
            notifier,
            limit: max_connections.map(ConnectionLimit::new),
            slot: Mutex::new(None),
        }
    }

    /// Binds `host:port` and starts accepting. Returns the bound address,
    /// which differs from `port` when `port` is `0`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyRunning`] while a listener is active,
    /// or [`LifecycleError::Listener`] when binding or spawning fails.
    pub fn start(&self, host: &str, port: u16) -> Result<SocketAddr, LifecycleError> {
        let slot = self.claim()?;
        let handle = SocketListener::bind(host, port)
            .and_then(|listener| {
                listener.start(
                    Arc::clone(&self.handler),
                    self.notifier.clone(),
                    self.limit.clone(),
                )
            })
            .inspect_err(|error| {
                warn!(target: LIFECYCLE_TARGET, %error, host, port, "failed to start server");
                self.notifier.log(format!("Failed to start server: {error}"));
            })?;
        Ok(self.install(slot, handle))
    }

    /// Locks the slot for a new listener, reaping one that stopped on its own.
    fn claim(&self) -> Result<MutexGuard<'_, Option<ListenerHandle>>, LifecycleError> {
        let mut slot = self.lock();
        if let Some(handle) = slot.as_ref()
            && handle.is_running()
        {
            return Err(LifecycleError::AlreadyRunning {
                addr: handle.local_addr(),
            });
        }
        if let Some(stale) = slot.take() {
            debug!(target: LIFECYCLE_TARGET, "reaping listener that stopped on its own");
            if let Err(error) = stale.join() {
                warn!(target: LIFECYCLE_TARGET, %error, "previous listener ended abnormally");
            }
        }
        Ok(slot)
    }

    fn install(
        &self,
        mut slot: MutexGuard<'_, Option<ListenerHandle>>,
        handle: ListenerHandle,
    ) -> SocketAddr {
        let addr = handle.local_addr();
        *slot = Some(handle);
        drop(slot);

        info!(target: LIFECYCLE_TARGET, %addr, "server started");
        self.notifier.log(format!("Server started on {addr}"));
        self.notifier.status(ServerStatus::Online);
        addr
    }

    /// Stops accepting connections. Calling it on a stopped server is a
    /// no-op.
    ///
    /// Open sessions are not closed forcibly; they end when their peer
    /// disconnects or, once idle, when they observe the cleared running
    /// flag.
    pub fn stop(&self) {
        let mut slot = self.lock();
        let Some(handle) = slot.take() else {
            debug!(target: LIFECYCLE_TARGET, "stop requested while already stopped");
            return;
        };
        let stopped_now = handle.shutdown();
        if let Err(error) = handle.join() {
            warn!(target: LIFECYCLE_TARGET, %error, "listener thread ended abnormally");
            self.notifier.log(format!("Listener ended abnormally: {error}"));
        }
        drop(slot);

        if stopped_now {
            info!(target: LIFECYCLE_TARGET, "server stopped");
            self.notifier.log("Server stopped");
            self.notifier.status(ServerStatus::Offline);
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        if self.lock().as_ref().is_some_and(ListenerHandle::is_running) {
            LifecycleState::Running
        } else {
            LifecycleState::Stopped
        }
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock()
            .as_ref()
            .filter(|handle| handle.is_running())
            .map(ListenerHandle::local_addr)
    }

    fn lock(&self) -> MutexGuard<'_, Option<ListenerHandle>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ServerLifecycle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerLifecycle")
            .field("state", &self.state())
            .field("addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl Drop for ServerLifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}
