//! Outcome errors carried across the owner-thread boundary.

use std::time::Duration;

use thiserror::Error;

use super::CallId;

/// Failure outcome of a queued owner-thread call.
///
/// The `Display` form is what clients see in the `error` field of a response,
/// so messages stay short and free of internal detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The callable ran and reported a failure. A blank message is shown as
    /// a generic description so clients never receive an empty error.
    #[error("{}", describe_failure(.message))]
    Failed {
        /// Failure description supplied by the callable.
        message: String,
    },
    /// The callable panicked; the panic was contained on the owner thread.
    #[error("command panicked on the owner thread: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
    /// The owner thread did not complete the call in time.
    #[error("timed out after {timeout:?} waiting for the owner thread")]
    TimedOut {
        /// Identifier of the abandoned call.
        id: CallId,
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// The queue was closed before the call completed.
    #[error("command queue is closed")]
    Closed,
    /// No result slot exists for the identifier.
    #[error("no pending call with id {id}")]
    UnknownCall {
        /// Identifier that was looked up.
        id: CallId,
    },
}

impl CallError {
    /// Creates a failure outcome with the given description.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

fn describe_failure(message: &str) -> &str {
    if message.trim().is_empty() {
        DEFAULT_FAILURE
    } else {
        message
    }
}

const DEFAULT_FAILURE: &str = "command failed";

impl From<serde_json::Error> for CallError {
    fn from(error: serde_json::Error) -> Self {
        Self::failed(error.to_string())
    }
}
