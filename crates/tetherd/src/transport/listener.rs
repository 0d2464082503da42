//! Listener implementation for broker sockets.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::notifier::{Notifier, ServerStatus};

use super::{ConnectionHandler, ConnectionLimit, LISTENER_TARGET, ListenerError, RunningFlag};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const REJECT_MESSAGE: &[u8] = b"{\"error\":\"Too many connections\"}\n";

/// Bound, not yet accepting, TCP listener.
#[derive(Debug)]
pub(crate) struct SocketListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl SocketListener {
    pub(crate) fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let listener = bind_tcp(host, port)?;
        let addr = listener
            .local_addr()
            .map_err(|source| ListenerError::LocalAddr { source })?;
        Ok(Self { listener, addr })
    }

    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Spawns the accept loop. The returned handle owns the loop's lifetime.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
        notifier: Notifier,
        limit: Option<ConnectionLimit>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let addr = self.local_addr();
        spawn_accept_loop(self.listener, addr, handler, notifier, limit)
    }
}

/// Source of connections polled by the accept loop.
pub(crate) trait Accept: Send + 'static {
    /// Returns the next waiting connection, or `Ok(None)` when there is none.
    fn poll_accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>>;
}

impl Accept for TcpListener {
    fn poll_accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                Ok(Some((stream, peer)))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Runs an accept loop over `source` on a dedicated thread.
pub(crate) fn spawn_accept_loop<A: Accept>(
    source: A,
    addr: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    notifier: Notifier,
    limit: Option<ConnectionLimit>,
) -> Result<ListenerHandle, ListenerError> {
    let running = RunningFlag::raised();
    let accept_loop = AcceptLoop {
        source,
        addr,
        running: running.clone(),
        handler,
        notifier,
        limit,
    };
    let handle = thread::Builder::new()
        .name(String::from("tether-accept"))
        .spawn(move || accept_loop.run())
        .map_err(|source| ListenerError::Spawn { source })?;
    Ok(ListenerHandle {
        running,
        addr,
        handle: Some(handle),
    })
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    running: RunningFlag,
    addr: SocketAddr,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.is_set()
    }

    /// Asks the accept loop to exit. Returns `true` if this call stopped a
    /// running loop, `false` if it had already stopped.
    pub(crate) fn shutdown(&self) -> bool {
        self.running.clear()
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.running.clear();
    }
}

struct AcceptLoop<A> {
    source: A,
    addr: SocketAddr,
    running: RunningFlag,
    handler: Arc<dyn ConnectionHandler>,
    notifier: Notifier,
    limit: Option<ConnectionLimit>,
}

impl<A: Accept> AcceptLoop<A> {
    fn run(mut self) {
        info!(target: LISTENER_TARGET, addr = %self.addr, "socket listener active");
        let mut last_error = None::<io::ErrorKind>;
        while self.running.is_set() {
            match self.source.poll_accept() {
                Ok(Some((stream, peer))) => {
                    last_error = None;
                    self.dispatch(stream, peer);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) if is_transient(error.kind()) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(target: LISTENER_TARGET, %error, "transient accept error");
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
                Err(error) => {
                    self.fail(&error);
                    break;
                }
            }
        }
        info!(target: LISTENER_TARGET, addr = %self.addr, "socket listener stopped");
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let permit = match &self.limit {
            Some(limit) => match limit.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    warn!(
                        target: LISTENER_TARGET,
                        %peer,
                        active = limit.active(),
                        max = limit.max(),
                        "rejecting connection over session limit"
                    );
                    reject(stream);
                    return;
                }
            },
            None => None,
        };

        debug!(target: LISTENER_TARGET, %peer, "client connected");
        let handler = Arc::clone(&self.handler);
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name(format!("tether-session-{peer}"))
            .spawn(move || {
                let _permit = permit;
                handler.handle(stream, running);
            });
        if let Err(error) = spawned {
            warn!(target: LISTENER_TARGET, %peer, %error, "failed to spawn session thread");
            self.notifier
                .log(format!("Failed to start session for {peer}: {error}"));
        }
    }

    fn fail(&self, error: &io::Error) {
        if !self.running.clear() {
            debug!(target: LISTENER_TARGET, %error, "accept error after shutdown suppressed");
            return;
        }
        error!(target: LISTENER_TARGET, %error, addr = %self.addr, "accept failed; listener stopping");
        self.notifier
            .log(format!("Error accepting connection: {error}"));
        self.notifier.status(ServerStatus::Offline);
    }
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

fn reject(mut stream: TcpStream) {
    if let Err(error) = stream.write_all(REJECT_MESSAGE).and_then(|()| stream.flush()) {
        debug!(target: LISTENER_TARGET, %error, "failed to notify rejected client");
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}
