use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Idle polls below this count keep the fast delay.
pub const IDLE_MEDIUM_THRESHOLD: u32 = 3;
/// Idle polls at or above this count use the slow delay.
pub const IDLE_SLOW_THRESHOLD: u32 = 10;

/// Continuation token returned by the tail endpoint.
///
/// Offsets only move forward; see [`PollState::record_success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDelays {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl Default for PollDelays {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(1_500),
            medium: Duration::from_millis(3_000),
            slow: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub delays: PollDelays,
    /// Consecutive failures before the degraded signal is raised.
    pub degraded_after: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delays: PollDelays::default(),
            degraded_after: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedChange {
    Raised,
    Cleared,
}

/// What the scheduler should do after a fetch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub next_delay: Duration,
    pub degraded: Option<DegradedChange>,
}

/// Counters driving the adaptive poll delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    idle_count: u32,
    error_count: u32,
    cursor: Option<Cursor>,
    degraded: bool,
    config: PollConfig,
}

impl PollState {
    pub fn new(config: PollConfig) -> Self {
        Self {
            idle_count: 0,
            error_count: 0,
            cursor: None,
            degraded: false,
            config,
        }
    }

    pub fn idle_count(&self) -> u32 {
        self.idle_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// A fetch returned `entry_count` entries and an optional continuation.
    ///
    /// A continuation behind the current cursor is ignored.
    pub fn record_success(&mut self, entry_count: usize, next_cursor: Option<Cursor>) -> PollOutcome {
        if let Some(next) = next_cursor {
            match self.cursor {
                Some(current) if next < current => {
                    warn!(
                        current = current.value(),
                        offered = next.value(),
                        "ignoring regressing poll cursor"
                    );
                }
                _ => self.cursor = Some(next),
            }
        }

        self.error_count = 0;
        let degraded = if self.degraded {
            self.degraded = false;
            Some(DegradedChange::Cleared)
        } else {
            None
        };

        if entry_count > 0 {
            self.idle_count = 0;
        } else {
            self.idle_count = self.idle_count.saturating_add(1);
        }

        PollOutcome {
            next_delay: self.idle_delay(),
            degraded,
        }
    }

    /// A fetch failed. Failures also count toward idle backoff.
    pub fn record_failure(&mut self) -> PollOutcome {
        self.error_count = self.error_count.saturating_add(1);
        self.idle_count = self.idle_count.saturating_add(1);

        let degraded = if !self.degraded && self.error_count >= self.config.degraded_after {
            self.degraded = true;
            Some(DegradedChange::Raised)
        } else {
            None
        };

        PollOutcome {
            next_delay: self.idle_delay(),
            degraded,
        }
    }

    fn idle_delay(&self) -> Duration {
        let delays = self.config.delays;
        if self.idle_count < IDLE_MEDIUM_THRESHOLD {
            delays.fast
        } else if self.idle_count < IDLE_SLOW_THRESHOLD {
            delays.medium
        } else {
            delays.slow
        }
    }
}
