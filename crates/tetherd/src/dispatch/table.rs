//! Command-name routing table.
//!
//! Handlers run on the session thread. They may validate fields and do
//! read-only work there, but anything touching owner state is returned as an
//! [`OwnerCall`] for the pump to run.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::errors::DispatchError;
use super::request::Command;
use crate::queue::OwnerCall;

/// Turns a decoded command into work for the owner thread.
pub trait CommandHandler<S>: Send + Sync {
    /// Validates `command` and packages the owner-thread callable.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the command cannot be served; nothing
    /// is queued in that case.
    fn prepare(&self, command: Command) -> Result<OwnerCall<S>, DispatchError>;
}

impl<S, F> CommandHandler<S> for F
where
    F: Fn(Command) -> Result<OwnerCall<S>, DispatchError> + Send + Sync,
{
    fn prepare(&self, command: Command) -> Result<OwnerCall<S>, DispatchError> {
        self(command)
    }
}

/// Registered handler plus its wait policy.
pub struct HandlerEntry<S> {
    handler: Box<dyn CommandHandler<S>>,
    await_timeout: Option<Duration>,
}

impl<S> HandlerEntry<S> {
    /// Handler for the command.
    pub fn handler(&self) -> &dyn CommandHandler<S> {
        self.handler.as_ref()
    }

    /// Wait bound that overrides the session default, if any.
    pub fn await_timeout(&self) -> Option<Duration> {
        self.await_timeout
    }
}

/// Mapping from command name to handler, populated at startup.
pub struct HandlerTable<S> {
    entries: HashMap<String, HandlerEntry<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S> HandlerTable<S> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure handler under `name`, replacing any earlier
    /// registration.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Command) -> Result<OwnerCall<S>, DispatchError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Box::new(handler), None)
    }

    /// Registers a closure handler with its own await bound, for commands
    /// known to run much longer or shorter than the default.
    pub fn register_with_timeout<F>(
        &mut self,
        name: impl Into<String>,
        timeout: Duration,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Command) -> Result<OwnerCall<S>, DispatchError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Box::new(handler), Some(timeout))
    }

    /// Registers any [`CommandHandler`] implementation.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn CommandHandler<S>>,
        await_timeout: Option<Duration>,
    ) -> &mut Self {
        self.insert(name.into(), handler, await_timeout)
    }

    /// Builder form of [`HandlerTable::register`].
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Command) -> Result<OwnerCall<S>, DispatchError> + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    /// Looks up the entry for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownCommand`] when nothing is registered.
    pub fn resolve(&self, name: &str) -> Result<&HandlerEntry<S>, DispatchError> {
        self.entries
            .get(name)
            .ok_or_else(|| DispatchError::unknown_command(name))
    }

    /// Returns whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered command names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no command is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(
        &mut self,
        name: String,
        handler: Box<dyn CommandHandler<S>>,
        await_timeout: Option<Duration>,
    ) -> &mut Self {
        self.entries.insert(
            name,
            HandlerEntry {
                handler,
                await_timeout,
            },
        );
        self
    }
}

impl<S> fmt::Debug for HandlerTable<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HandlerTable")
            .field("commands", &self.names())
            .finish()
    }
}
