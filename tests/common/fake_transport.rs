//! Scripted in-memory push transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use swarmdeck_lib::push::{Incoming, PushSession, PushTransport, TransportError};

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Accept,
    Refuse,
}

enum ServerEvent {
    Frame(Incoming),
    Fail,
    Close,
}

/// Test-side handle on one accepted session.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn push_text(&self, text: &str) {
        let _ = self.events.send(ServerEvent::Frame(Incoming::Text(text.to_string())));
    }

    pub fn push_binary(&self, bytes: &[u8]) {
        let _ = self.events.send(ServerEvent::Frame(Incoming::Binary(bytes.to_vec())));
    }

    /// Server-initiated clean close.
    pub fn close(&self) {
        let _ = self.events.send(ServerEvent::Close);
    }

    /// Abrupt socket error.
    pub fn fail(&self) {
        let _ = self.events.send(ServerEvent::Fail);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the client side closed or dropped the session.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    events: mpsc::UnboundedReceiver<ServerEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PushSession for FakeSession {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.events.recv().await {
            Some(ServerEvent::Frame(incoming)) => Ok(Some(incoming)),
            Some(ServerEvent::Fail) => Err(TransportError::Socket("connection reset".into())),
            Some(ServerEvent::Close) | None => Ok(None),
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    script: Mutex<VecDeque<Script>>,
    fallback: Mutex<Script>,
    latency: Mutex<Duration>,
    connects: Mutex<Vec<Instant>>,
    sessions: Mutex<Vec<SessionHandle>>,
}

impl FakeTransport {
    pub fn new(fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            latency: Mutex::new(Duration::ZERO),
            connects: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(Script::Accept)
    }

    pub fn refusing() -> Arc<Self> {
        Self::new(Script::Refuse)
    }

    /// Outcomes for the next attempts, before falling back.
    pub fn scripted(steps: &[Script], fallback: Script) -> Arc<Self> {
        let transport = Self::new(fallback);
        transport.script.lock().unwrap().extend(steps.iter().copied());
        transport
    }

    pub fn set_fallback(&self, fallback: Script) {
        *self.fallback.lock().unwrap() = fallback;
    }

    /// Every later connect attempt takes `latency` before it resolves.
    pub fn set_connect_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    pub fn session(&self, index: usize) -> SessionHandle {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn latest_session(&self) -> SessionHandle {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session was accepted")
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushSession>, TransportError> {
        self.connects.lock().unwrap().push(Instant::now());
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.fallback.lock().unwrap());
        match step {
            Script::Refuse => Err(TransportError::Connection(format!("{url}: connection refused"))),
            Script::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                let sent = Arc::new(Mutex::new(Vec::new()));
                let closed = Arc::new(AtomicBool::new(false));
                self.sessions.lock().unwrap().push(SessionHandle {
                    events: tx,
                    sent: sent.clone(),
                    closed: closed.clone(),
                });
                Ok(Box::new(FakeSession {
                    events: rx,
                    sent,
                    closed,
                }))
            }
        }
    }
}
