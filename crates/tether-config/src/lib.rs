//! Shared configuration for the tether broker and its host binary.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then an optional
//! configuration file, then `TETHER_*` environment variables, then command
//! line flags. Every field carries a default so an empty environment yields a
//! usable configuration listening on `127.0.0.1:5555`.

mod defaults;
mod logging;

use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_AWAIT_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_REQUEST_BYTES, DEFAULT_PORT, DEFAULT_PUMP_INTERVAL_MS, default_await_timeout_ms,
    default_host, default_log_filter, default_log_filter_string, default_log_format,
    default_max_connections, default_max_request_bytes, default_port, default_pump_interval_ms,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Host name or address the listener binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port the listener binds to; `0` asks the OS for a free port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Filter expression passed to the tracing subscriber.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// How long a session waits for an owner-thread result; `0` waits forever.
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
    /// Maximum number of concurrent sessions; `0` leaves it unbounded.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Largest request line a session buffers before rejecting it.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Host owner-loop polling cadence, in milliseconds.
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            await_timeout_ms: default_await_timeout_ms(),
            max_connections: default_max_connections(),
            max_request_bytes: default_max_request_bytes(),
            pump_interval_ms: default_pump_interval_ms(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments, environment, and any
    /// configuration file.
    ///
    /// # Errors
    ///
    /// Returns the loader error when a layer fails to parse or merge.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration using `args` in place of the process arguments.
    ///
    /// The first item is the program name, as with [`std::env::args_os`].
    ///
    /// # Errors
    ///
    /// Returns the loader error when a layer fails to parse or merge.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Host the listener binds to.
    #[must_use]
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// Port the listener binds to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Default await timeout, or `None` when sessions should wait forever.
    #[must_use]
    pub const fn await_timeout(&self) -> Option<Duration> {
        if self.await_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.await_timeout_ms))
        }
    }

    /// Session cap, or `None` when unbounded.
    #[must_use]
    pub const fn max_connections(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.max_connections)
    }

    /// Largest request line a session buffers.
    #[must_use]
    pub const fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Host owner-loop polling cadence.
    #[must_use]
    pub const fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }
}
