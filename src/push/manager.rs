use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::frame::{OutboundMessage, PushFrame};
use super::state::{CloseOutcome, ConnectionState, ConnectionStateMachine, DEFAULT_MAX_RETRIES};
use super::transport::{Incoming, PushSession, PushTransport, WsTransport};
use crate::bus::{SignalBus, SignalKind};
use crate::config::{ConfigError, SyncConfig};
use crate::retry::{JitterSource, RandJitter, RetryPolicy};

/// Handle returned by [`ConnectionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type FrameCallback = Arc<dyn Fn(&PushFrame) + Send + Sync>;
type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kinds: Vec<String>,
    callback: FrameCallback,
}

impl Subscriber {
    fn accepts(&self, kind: &str) -> bool {
        self.kinds.is_empty() || self.kinds.iter().any(|k| k == kind)
    }
}

#[derive(Clone)]
pub struct ConnectionOptions {
    pub retry: RetryPolicy,
    pub max_retries: u32,
    pub bus: Option<Arc<SignalBus>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            bus: None,
        }
    }
}

struct Shared {
    url: String,
    transport: Arc<dyn PushTransport>,
    policy: RetryPolicy,
    bus: Option<Arc<SignalBus>>,
    jitter: Mutex<Box<dyn JitterSource>>,
    machine: Mutex<ConnectionStateMachine>,
    subscribers: Mutex<Vec<Subscriber>>,
    listeners: Mutex<Vec<StateCallback>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    disposed: AtomicBool,
    next_subscription: AtomicU64,
    arrivals: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sole owner of the push connection.
///
/// At most one session is open at a time. Inbound frames are dispatched to
/// subscribers synchronously and in transport order; every state transition
/// is reported to the state listeners. Failed connects and closed sessions
/// share one backoff path until the retry ceiling is reached.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn PushTransport>,
        options: ConnectionOptions,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                transport,
                policy: options.retry,
                bus: options.bus,
                jitter: Mutex::new(Box::new(RandJitter::new())),
                machine: Mutex::new(ConnectionStateMachine::new(options.max_retries)),
                subscribers: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
                wake: Notify::new(),
                shutdown,
                disposed: AtomicBool::new(false),
                next_subscription: AtomicU64::new(1),
                arrivals: AtomicU64::new(0),
            }),
        }
    }

    /// WebSocket manager for the push address derived from `config`.
    pub fn from_config(config: &SyncConfig, bus: Option<Arc<SignalBus>>) -> Result<Self, ConfigError> {
        let url = config.push_url()?;
        Ok(Self::new(
            url,
            Arc::new(WsTransport),
            ConnectionOptions {
                retry: config.retry_policy(),
                max_retries: config.max_retries,
                bus,
            },
        ))
    }

    /// Replace the randomness used for backoff jitter.
    pub fn with_jitter(self, jitter: impl JitterSource + 'static) -> Self {
        *lock(&self.shared.jitter) = Box::new(jitter);
        self
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.machine).state()
    }

    /// Consecutive failed connections since the last successful open.
    pub fn attempt(&self) -> u32 {
        lock(&self.shared.machine).attempt()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Open the push session if none is open or being opened.
    ///
    /// While waiting out a backoff this skips the remaining delay. From
    /// `ClosedPermanently` it starts over with a fresh retry budget. Must be
    /// called from within a tokio runtime.
    pub fn connect(&self) {
        let shared = &self.shared;
        if shared.is_disposed() {
            debug!(url = %shared.url, "connect ignored after dispose");
            return;
        }

        let stale = {
            let mut driver = lock(&shared.driver);
            let driver_alive = driver.as_ref().is_some_and(|handle| !handle.is_finished());
            let mut machine = lock(&shared.machine);
            match machine.state() {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(url = %shared.url, state = %machine.state(), "connect is a no-op");
                    return;
                }
                ConnectionState::Disconnected if driver_alive => {
                    debug!(url = %shared.url, "manual reconnect; skipping backoff");
                    shared.wake.notify_one();
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::ClosedPermanently => {}
            }
            if !machine.begin_connect() {
                return;
            }
            driver.take()
        };
        if let Some(stale) = stale {
            stale.abort();
        }

        shared.emit_state(ConnectionState::Connecting);
        *lock(&shared.driver) = Some(tokio::spawn(drive(shared.clone())));
    }

    /// Register `callback` for frames whose kind is in `kinds` (all kinds
    /// when empty).
    pub fn subscribe<F>(&self, kinds: &[&str], callback: F) -> SubscriptionId
    where
        F: Fn(&PushFrame) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        if self.shared.is_disposed() {
            return id;
        }
        lock(&self.shared.subscribers).push(Subscriber {
            id,
            kinds: kinds.iter().map(|kind| kind.to_string()).collect(),
            callback: Arc::new(callback),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.shared.subscribers);
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        if self.shared.is_disposed() {
            return;
        }
        lock(&self.shared.listeners).push(Arc::new(callback));
    }

    /// Queue `message` on the open session. Returns false (and drops the
    /// message) unless connected.
    pub fn send(&self, message: impl Into<OutboundMessage>) -> bool {
        if self.state() != ConnectionState::Connected {
            debug!(url = %self.shared.url, "dropping outbound message while not connected");
            return false;
        }
        let text = match message.into().into_text() {
            Ok(text) => text,
            Err(error) => {
                warn!(error = %error, "failed to serialize outbound message");
                return false;
            }
        };
        match lock(&self.shared.outbound).as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Cancel any backoff, close any open session and stop reconnecting.
    /// Listeners and subscribers are released; later calls are no-ops.
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.shutdown.send_replace(true);
        // The driver observes the shutdown, closes its session and exits.
        lock(&shared.driver).take();
        lock(&shared.outbound).take();
        lock(&shared.subscribers).clear();
        lock(&shared.listeners).clear();
        lock(&shared.machine).on_disposed();
        info!(url = %shared.url, "push channel disposed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn emit_state(&self, state: ConnectionState) {
        if self.is_disposed() {
            return;
        }
        let listeners: Vec<StateCallback> = lock(&self.listeners).clone();
        for listener in listeners {
            listener(state);
        }
        if let Some(bus) = &self.bus {
            bus.emit(SignalKind::ConnectionChanged { state });
        }
    }

    fn dispatch(&self, incoming: Incoming) {
        let text = match incoming {
            Incoming::Text(text) => text,
            Incoming::Binary(bytes) => {
                debug!(len = bytes.len(), "ignoring binary push frame");
                return;
            }
        };
        // Only the driver task dispatches, so load-then-store cannot race.
        let arrival = self.arrivals.load(Ordering::Relaxed);
        let frame = match PushFrame::parse(&text, arrival) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(error = %error, "dropping malformed push frame");
                return;
            }
        };
        self.arrivals.store(arrival + 1, Ordering::Relaxed);
        let callbacks: Vec<FrameCallback> = lock(&self.subscribers)
            .iter()
            .filter(|subscriber| subscriber.accepts(frame.kind()))
            .map(|subscriber| subscriber.callback.clone())
            .collect();
        for callback in callbacks {
            callback(&frame);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Shutdown,
}

async fn drive(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    if shared.is_disposed() {
        return;
    }

    loop {
        let connected = tokio::select! {
            result = shared.transport.connect(&shared.url) => result,
            _ = shutdown.changed() => return,
        };
        if shared.is_disposed() {
            if let Ok(mut session) = connected {
                session.close().await;
            }
            return;
        }

        match connected {
            Ok(mut session) => {
                // The queue must exist before anyone can observe `Connected`.
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&shared.outbound) = Some(tx);
                lock(&shared.machine).on_open();
                info!(url = %shared.url, "push channel connected");
                shared.emit_state(ConnectionState::Connected);

                let end = pump(&shared, session.as_mut(), rx, &mut shutdown).await;
                lock(&shared.outbound).take();
                session.close().await;
                if end == SessionEnd::Shutdown || shared.is_disposed() {
                    return;
                }
            }
            Err(error) => {
                let attempt = lock(&shared.machine).attempt();
                warn!(
                    url = %shared.url,
                    attempt,
                    error = %error,
                    retryable = error.is_retryable(),
                    "push connect failed"
                );
            }
        }

        let outcome = lock(&shared.machine).on_closed();
        shared.emit_state(ConnectionState::Disconnected);
        match outcome {
            CloseOutcome::Retry { attempt } => {
                let delay = shared.policy.delay(attempt, lock(&shared.jitter).as_mut());
                info!(
                    url = %shared.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "push reconnect scheduled"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.wake.notified() => {}
                    _ = shutdown.changed() => return,
                }
                if shared.is_disposed() {
                    return;
                }
                if !lock(&shared.machine).begin_connect() {
                    return;
                }
                // A wake that raced the elapsed sleep would otherwise cut
                // the next backoff short.
                let _ = shared.wake.notified().now_or_never();
                shared.emit_state(ConnectionState::Connecting);
            }
            CloseOutcome::Exhausted => {
                error!(
                    url = %shared.url,
                    max_retries = lock(&shared.machine).max_retries(),
                    "push retry ceiling reached; giving up"
                );
                shared.emit_state(ConnectionState::ClosedPermanently);
                return;
            }
        }
    }
}

async fn pump(
    shared: &Shared,
    session: &mut dyn PushSession,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        tokio::select! {
            incoming = session.recv() => match incoming {
                Ok(Some(incoming)) => {
                    if shared.is_disposed() {
                        return SessionEnd::Shutdown;
                    }
                    shared.dispatch(incoming);
                }
                Ok(None) => {
                    info!(url = %shared.url, "push channel closed by peer");
                    return SessionEnd::Closed;
                }
                Err(error) => {
                    warn!(url = %shared.url, error = %error, "push session failed");
                    return SessionEnd::Closed;
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(error) = session.send(text).await {
                    warn!(url = %shared.url, error = %error, "push send failed");
                    return SessionEnd::Closed;
                }
            }
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        }
    }
}
