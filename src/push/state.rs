use serde::{Deserialize, Serialize};

/// Consecutive failed connections tolerated before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ClosedPermanently,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ClosedPermanently => "closed_permanently",
        };
        f.write_str(label)
    }
}

/// What the manager should do after a session ends or a connect fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Wait out the backoff for `attempt` (0-based), then reconnect.
    Retry { attempt: u32 },
    /// The retry ceiling was reached.
    Exhausted,
}

/// Pure connection lifecycle bookkeeping; the manager drives the I/O.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    attempt: u32,
    max_retries: u32,
}

impl ConnectionStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed connections since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Enter `Connecting`. Returns false when a session is already being
    /// opened or is open. Leaving `ClosedPermanently` starts a fresh budget.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => false,
            ConnectionState::ClosedPermanently => {
                self.attempt = 0;
                self.state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    pub fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempt = 0;
    }

    /// A connect failed or an open session ended.
    pub fn on_closed(&mut self) -> CloseOutcome {
        if self.attempt < self.max_retries {
            let attempt = self.attempt;
            self.attempt += 1;
            self.state = ConnectionState::Disconnected;
            CloseOutcome::Retry { attempt }
        } else {
            self.state = ConnectionState::ClosedPermanently;
            CloseOutcome::Exhausted
        }
    }

    pub fn on_disposed(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
