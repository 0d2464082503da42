//! Log and status messages carried from broker threads to an observer.
//!
//! Any thread may post through a [`Notifier`]; only the observer's own thread
//! drains the paired [`NotificationInbox`]. Every post is also recorded as a
//! `tracing` event, so a message is never lost silently even when the
//! observer has gone away.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;
use tracing::{debug, info};

use crate::queue::Waker;

const NOTIFIER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::notifier");

/// Category of a posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Free-form log line.
    Log,
    /// Server status change; the payload is a [`ServerStatus`] rendering.
    Status,
}

/// Server status reported through [`NotificationKind::Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// The listener is accepting connections.
    Online,
    /// The listener has stopped.
    Offline,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
        })
    }
}

/// Message delivered to the observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Message category.
    pub kind: NotificationKind,
    /// Message text.
    pub payload: String,
}

impl Notification {
    /// Returns the status carried by a status message, if any.
    #[must_use]
    pub fn status(&self) -> Option<ServerStatus> {
        if self.kind != NotificationKind::Status {
            return None;
        }
        match self.payload.as_str() {
            "Online" => Some(ServerStatus::Online),
            "Offline" => Some(ServerStatus::Offline),
            _ => None,
        }
    }
}

/// Sending half; cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct Notifier {
    sender: Sender<Notification>,
    waker: Arc<dyn Waker>,
}

impl Notifier {
    /// Creates a connected notifier and inbox. `waker` is raised after every
    /// post so the observer can drain promptly.
    pub fn channel(waker: Arc<dyn Waker>) -> (Self, NotificationInbox) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender, waker }, NotificationInbox { receiver })
    }

    /// Queues a message for the observer. Never blocks.
    pub fn post(&self, kind: NotificationKind, payload: impl Into<String>) {
        let notification = Notification {
            kind,
            payload: payload.into(),
        };
        info!(
            target: NOTIFIER_TARGET,
            kind = ?notification.kind,
            payload = %notification.payload,
            "notification posted"
        );
        if self.sender.send(notification).is_err() {
            debug!(target: NOTIFIER_TARGET, "observer inbox closed; notification dropped");
            return;
        }
        self.waker.wake();
    }

    /// Posts a log line.
    pub fn log(&self, payload: impl Into<String>) {
        self.post(NotificationKind::Log, payload);
    }

    /// Posts a status change.
    pub fn status(&self, status: ServerStatus) {
        self.post(NotificationKind::Status, status.to_string());
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Notifier").finish_non_exhaustive()
    }
}

/// Receiving half, owned by the observer's thread.
#[derive(Debug)]
pub struct NotificationInbox {
    receiver: Receiver<Notification>,
}

impl NotificationInbox {
    /// Removes and returns every queued message in posting order.
    pub fn drain(&self) -> Vec<Notification> {
        self.receiver.try_iter().collect()
    }
}
