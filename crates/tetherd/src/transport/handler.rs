//! Connection handling abstractions for the broker listener.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Liveness flag shared by the accept loop and its sessions.
///
/// Cleared exactly once, by whichever of `Stop` or a fatal accept error gets
/// there first.
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    /// Creates a raised flag.
    #[must_use]
    pub fn raised() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Returns whether the listener is still running.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lowers the flag, returning `true` if this call lowered it.
    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Handles accepted socket connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serves a single connection until it closes. Runs on a dedicated
    /// session thread; implementations should avoid panicking.
    fn handle(&self, stream: TcpStream, running: RunningFlag);
}
