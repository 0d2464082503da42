//! Default values shared by the broker library and the host binary.

use crate::logging::LogFormat;

/// Host the broker listens on when nothing else is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the broker listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 5555;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default bound on how long a session waits for the owner thread, in
/// milliseconds. Long enough for render-style commands.
pub const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 120_000;

/// Default session cap; `0` leaves the number of sessions unbounded.
pub const DEFAULT_MAX_CONNECTIONS: usize = 0;

/// Default upper bound for a single buffered request line.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Default cadence of the host owner loop, in milliseconds.
pub const DEFAULT_PUMP_INTERVAL_MS: u64 = 50;

/// Owned default host used where allocation is required (e.g. serde).
#[must_use]
pub fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

/// Default listen port.
#[must_use]
pub const fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default await timeout in milliseconds.
#[must_use]
pub const fn default_await_timeout_ms() -> u64 {
    DEFAULT_AWAIT_TIMEOUT_MS
}

/// Default session cap.
#[must_use]
pub const fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// Default request size bound.
#[must_use]
pub const fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

/// Default pump interval in milliseconds.
#[must_use]
pub const fn default_pump_interval_ms() -> u64 {
    DEFAULT_PUMP_INTERVAL_MS
}
