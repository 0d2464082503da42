//! Broker harness shared by the end-to-end suites.
//!
//! The harness plays the host: it owns [`DemoState`] on a dedicated owner
//! thread that pumps until told to stop, and can pause pumping to simulate a
//! frozen owner context.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::client::BrokerClient;
use crate::demo::{DemoState, demo_handlers};
use crate::{
    Broker, BrokerOptions, LifecycleError, Notification, NotificationInbox, Notifier, PumpSignal,
    ServerStatus, SessionOptions, Waker,
};

pub(crate) const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct BrokerHarness {
    broker: Broker<DemoState>,
    addr: SocketAddr,
    inbox: NotificationInbox,
    signal: Arc<PumpSignal>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    owner: Option<JoinHandle<DemoState>>,
}

impl BrokerHarness {
    pub(crate) fn start() -> Self {
        Self::with_options(BrokerOptions::default())
    }

    pub(crate) fn with_await_timeout(timeout: Duration) -> Self {
        Self::with_options(BrokerOptions {
            session: SessionOptions {
                await_timeout: Some(timeout),
                ..SessionOptions::default()
            },
            ..BrokerOptions::default()
        })
    }

    pub(crate) fn with_options(options: BrokerOptions) -> Self {
        let signal = Arc::new(PumpSignal::new());
        let waker: Arc<dyn Waker> = signal.clone();
        let (notifier, inbox) = Notifier::channel(Arc::clone(&waker));
        let (broker, pump) = Broker::new(demo_handlers(), notifier, waker, options);
        let addr = broker.start("127.0.0.1", 0).expect("start broker");

        let paused = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let owner = {
            let signal = Arc::clone(&signal);
            let paused = Arc::clone(&paused);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut state = DemoState::default();
                while !stop.load(Ordering::SeqCst) {
                    signal.wait_timeout(Duration::from_millis(5));
                    if !paused.load(Ordering::SeqCst) {
                        pump.pump(&mut state);
                    }
                }
                state
            })
        };

        Self {
            broker,
            addr,
            inbox,
            signal,
            paused,
            stop,
            owner: Some(owner),
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn broker(&self) -> &Broker<DemoState> {
        &self.broker
    }

    pub(crate) fn connect(&self) -> BrokerClient {
        BrokerClient::connect(self.addr, CLIENT_TIMEOUT).expect("connect client")
    }

    pub(crate) fn pause_owner(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub(crate) fn restart(&self) -> Result<SocketAddr, LifecycleError> {
        self.broker.start("127.0.0.1", 0)
    }

    pub(crate) fn statuses(&self) -> Vec<ServerStatus> {
        self.inbox
            .drain()
            .iter()
            .filter_map(Notification::status)
            .collect()
    }

    /// Stops the owner thread and returns the state it owned.
    pub(crate) fn finish(mut self) -> DemoState {
        self.halt_owner().unwrap_or_default()
    }

    fn halt_owner(&mut self) -> Option<DemoState> {
        self.stop.store(true, Ordering::SeqCst);
        self.signal.wake();
        self.owner
            .take()
            .and_then(|owner| owner.join().ok())
    }
}

impl Drop for BrokerHarness {
    fn drop(&mut self) {
        self.broker.shutdown();
        self.halt_owner();
    }
}
