//! Error types for request dispatch failures.
//!
//! The `Display` form of every per-request variant is exactly the text a
//! client receives in the `error` field of its response.

use std::io;

use thiserror::Error;

use crate::queue::CallError;

/// Errors surfaced while parsing, routing, or executing one request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line is not valid JSON.
    #[error("Invalid JSON")]
    InvalidJson {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },

    /// Request is JSON but not a usable command object.
    #[error("Invalid command: {message}")]
    InvalidCommand {
        /// What was wrong with the request.
        message: String,
    },

    /// No handler is registered under the command name.
    #[error("Unknown command: {name}")]
    UnknownCommand {
        /// Name that failed to resolve.
        name: String,
    },

    /// Handler rejected the command's fields before queueing any work.
    #[error("Invalid arguments: {message}")]
    InvalidArguments {
        /// Description of the offending field.
        message: String,
    },

    /// The owner-thread call failed, timed out, or was abandoned.
    #[error(transparent)]
    Execution(#[from] CallError),

    /// Buffered request exceeds the configured limit.
    #[error("Request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge {
        /// Bytes buffered when the limit was hit.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Response serialization failed.
    #[error("Failed to serialize response: {0}")]
    SerializeResponse(#[from] serde_json::Error),
}

impl DispatchError {
    /// Creates an invalid command error.
    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    pub fn unknown_command(name: impl Into<String>) -> Self {
        Self::UnknownCommand { name: name.into() }
    }

    /// Creates an invalid arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Creates a request-too-large error.
    pub fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }

    /// Returns whether the session must close after reporting this error.
    ///
    /// Per-request failures leave the connection open; only transport-level
    /// failures end it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RequestTooLarge { .. } | Self::Io(_) | Self::SerializeResponse(_)
        )
    }
}
