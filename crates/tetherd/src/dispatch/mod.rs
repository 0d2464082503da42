//! Newline-delimited JSON command dispatch.
//!
//! Each connection is served by a session that frames incoming bytes into
//! lines, decodes every line as a [`Command`], resolves it in a
//! [`HandlerTable`], and runs the resulting owner-thread call through the
//! [`CommandQueue`](crate::queue::CommandQueue).
//!
//! ## Protocol
//!
//! One request per line, one response per request, in order:
//!
//! ```json
//! {"command":"echo","value":"hi"}
//! ```
//!
//! ```json
//! {"value":"hi"}
//! ```
//!
//! Failures are reported as `{"error": "<message>"}` and leave the connection
//! open. Success values that are not objects come back as
//! `{"result": <value>}`.

mod errors;
mod framing;
mod request;
mod response;
mod session;
mod table;

pub use self::errors::DispatchError;
pub use self::request::Command;
pub use self::response::ResponseWriter;
pub use self::session::{DispatchConnectionHandler, SessionOptions};
pub use self::table::{CommandHandler, HandlerEntry, HandlerTable};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
