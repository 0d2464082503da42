//! Thread-confined command broker.
//!
//! `tetherd` lets many TCP clients drive state that only one owner context
//! may touch. Clients send newline-delimited JSON commands; each session
//! thread turns its command into an [`OwnerCall`], submits it to the
//! [`CommandQueue`], and blocks until the owner context runs it through
//! [`OwnerThreadPump::pump`]. The pump is the only place callables execute,
//! which gives the owner state a single writer without any locking of its
//! own.
//!
//! ```text
//! client ──► Listener ──► session thread ──► CommandQueue ──► OwnerThreadPump
//!   ▲                          │                                  │
//!   └──────── response ◄───────┴────────── outcome ◄──────────────┘
//! ```
//!
//! [`Broker`] wires the pieces together. Lifecycle changes and log lines
//! reach an observer through the [`Notifier`], and every component emits
//! structured `tracing` events under the `tetherd::*` targets.

mod broker;
pub mod client;
pub mod demo;
pub mod dispatch;
mod host;
mod lifecycle;
mod notifier;
pub mod queue;
mod telemetry;
pub mod transport;

pub use broker::{Broker, BrokerOptions};
pub use dispatch::{
    Command, CommandHandler, DispatchConnectionHandler, DispatchError, HandlerTable,
    SessionOptions,
};
pub use host::{HostControl, HostError, run_host, serve};
pub use lifecycle::{LifecycleError, LifecycleState, ServerLifecycle};
pub use notifier::{Notification, NotificationInbox, NotificationKind, Notifier, ServerStatus};
pub use queue::{
    CallError, CallId, CallResult, CommandQueue, NoopWaker, OwnerCall, OwnerThreadPump,
    PumpReport, PumpSignal, Waker, owner_call,
};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

#[cfg(test)]
mod tests;
