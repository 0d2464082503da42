//! TCP listener for broker sessions.
//!
//! The transport binds the configured address and accepts connections in a
//! background thread, handing each one to a [`ConnectionHandler`] on its own
//! session thread.

mod errors;
mod handler;
mod limit;
mod listener;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, RunningFlag};
pub(crate) use self::limit::ConnectionLimit;
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::listener::spawn_accept_loop;
#[cfg(test)]
pub(crate) use self::test_utils::{CountingHandler, FailingAccept};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
