//! Error types for socket listener operations.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Host name resolution failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host that was looked up.
        host: String,
        /// Requested port.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution returned no usable address.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host that was looked up.
        host: String,
        /// Requested port.
        port: u16,
    },
    /// Binding the listening socket failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The bound socket could not report its address.
    #[error("failed to read listener address: {source}")]
    LocalAddr {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching the socket to non-blocking mode failed.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be spawned.
    #[error("failed to spawn accept thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
