//! Demonstration host: owns [`DemoState`] on the main thread and pumps it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{io, thread};

use ortho_config::OrthoError;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info, warn};

use tether_config::Config;

use crate::broker::{Broker, BrokerOptions};
use crate::demo::{DemoState, demo_handlers};
use crate::lifecycle::{LifecycleError, LifecycleState};
use crate::notifier::{Notification, NotificationInbox, Notifier};
use crate::queue::{PumpSignal, Waker};
use crate::telemetry::{self, TelemetryError};

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");

/// Errors that end the host process.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The broker could not be started.
    #[error("failed to start broker: {source}")]
    Lifecycle {
        /// Underlying lifecycle error.
        #[from]
        source: LifecycleError,
    },
    /// The listener died on its own while the host was running.
    #[error("listener stopped unexpectedly")]
    ListenerStopped,
}

/// Shared shutdown request for the owner loop.
#[derive(Debug, Clone, Default)]
pub struct HostControl {
    shutdown: Arc<AtomicBool>,
    signal: Arc<PumpSignal>,
}

impl HostControl {
    /// Creates a control with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the owner loop to finish its current cycle and exit.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.signal.wake();
    }

    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Loads configuration, initialises telemetry, installs signal handlers, and
/// serves until SIGINT, SIGTERM, SIGQUIT, or SIGHUP.
///
/// # Errors
///
/// Returns [`HostError`] when any startup step fails or the listener dies.
pub fn run_host() -> Result<(), HostError> {
    let config = Config::load().map_err(|source| HostError::Config { source })?;
    telemetry::initialise(&config).map_err(|source| HostError::Telemetry { source })?;

    let control = HostControl::new();
    let signals = watch_signals(control.clone())?;
    let result = serve(&config, &control, |addr| {
        info!(target: HOST_TARGET, %addr, "tetherd ready");
    });
    signals.close();

    let state = result?;
    info!(
        target: HOST_TARGET,
        counter = state.counter,
        values = state.values.len(),
        "tetherd exiting"
    );
    Ok(())
}

/// Runs the broker and the owner loop on the calling thread until `control`
/// requests shutdown, then returns the final owner state.
///
/// `ready` is called once with the bound address before the first pump.
///
/// # Errors
///
/// Returns [`HostError::Lifecycle`] when the broker cannot start and
/// [`HostError::ListenerStopped`] when the listener fails while serving.
pub fn serve(
    config: &Config,
    control: &HostControl,
    ready: impl FnOnce(SocketAddr),
) -> Result<DemoState, HostError> {
    let waker: Arc<dyn Waker> = control.signal.clone();
    let (notifier, inbox) = Notifier::channel(Arc::clone(&waker));
    let (broker, pump) = Broker::new(
        demo_handlers(),
        notifier,
        waker,
        BrokerOptions::from_config(config),
    );
    let addr = broker.start(config.host(), config.port())?;
    ready(addr);

    let mut state = DemoState::default();
    let mut outcome = Ok(());
    while !control.is_shutdown_requested() {
        control.signal.wait_timeout(config.pump_interval());
        let report = pump.pump(&mut state);
        if report.executed > 0 {
            debug!(
                target: HOST_TARGET,
                executed = report.executed,
                failed = report.failed,
                "pump cycle"
            );
        }
        observe(&inbox);
        if broker.state() == LifecycleState::Stopped {
            warn!(target: HOST_TARGET, "listener stopped; shutting down host");
            outcome = Err(HostError::ListenerStopped);
            break;
        }
    }

    broker.shutdown();
    observe(&inbox);
    outcome.map(|()| state)
}

fn observe(inbox: &NotificationInbox) {
    for Notification { kind, payload } in inbox.drain() {
        debug!(target: HOST_TARGET, ?kind, %payload, "observer notified");
    }
}

fn watch_signals(control: HostControl) -> Result<signal_hook::iterator::Handle, HostError> {
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
        .map_err(|source| HostError::Signals { source })?;
    let handle = signals.handle();
    thread::Builder::new()
        .name(String::from("tether-signals"))
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(target: HOST_TARGET, signal, "shutdown signal received");
                control.request_shutdown();
            }
        })
        .map_err(|source| HostError::Signals { source })?;
    Ok(handle)
}
