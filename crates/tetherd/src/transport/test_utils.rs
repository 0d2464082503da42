//! Test helpers for the transport module.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
};
use std::time::Duration;

use super::listener::Accept;
use super::{ConnectionHandler, RunningFlag};

pub(crate) struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
        });
        (count, handler)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, _stream: TcpStream, _running: RunningFlag) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Accept source whose first poll blocks until released, then fails with a
/// non-transient error.
pub(crate) struct FailingAccept {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Test-side controls for a [`FailingAccept`].
pub(crate) struct AcceptGate {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl FailingAccept {
    pub(crate) fn new() -> (Self, AcceptGate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                entered: entered_tx,
                release: release_rx,
            },
            AcceptGate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl Accept for FailingAccept {
    fn poll_accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        self.entered.send(()).ok();
        self.release.recv().ok();
        Err(io::Error::other("descriptor table exhausted"))
    }
}

impl AcceptGate {
    /// Blocks until the accept loop is parked inside the source.
    pub(crate) fn wait_until_polled(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(2))
            .expect("accept loop should poll the source");
    }

    /// Lets the parked poll return its error.
    pub(crate) fn fail(self) {
        self.release.send(()).ok();
    }
}
