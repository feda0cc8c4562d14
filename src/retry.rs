//! Reconnect backoff with injectable jitter.
//!
//! The delay for a given attempt is `min(base * 2^attempt, cap)` perturbed by
//! a symmetric jitter of `±jitter * base`. The random source is passed in by
//! the caller so tests can pin the perturbation and assert exact bounds.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default base delay for the first reconnect (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Ceiling for the non-jittered delay (milliseconds).
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Default jitter ratio applied symmetrically around the base delay.
pub const RETRY_JITTER_RATIO: f64 = 0.2;

/// Source of jitter samples.
///
/// Implementations must return values in `[-1.0, 1.0]`; anything outside is
/// clamped by [`RetryPolicy::delay`].
pub trait JitterSource: Send {
    fn sample(&mut self) -> f64;
}

/// Jitter backed by a seeded-from-entropy `StdRng`.
pub struct RandJitter {
    rng: StdRng,
}

impl RandJitter {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RandJitter {
    fn sample(&mut self) -> f64 {
        self.rng.gen_range(-1.0..=1.0)
    }
}

/// Replays a fixed sequence of samples, cycling when exhausted.
///
/// An empty sequence always yields `0.0` (no jitter).
#[derive(Debug, Clone, Default)]
pub struct SequenceJitter {
    values: Vec<f64>,
    next: usize,
}

impl SequenceJitter {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            next: 0,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl JitterSource for SequenceJitter {
    fn sample(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.next % self.values.len()];
        self.next = self.next.wrapping_add(1);
        value
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(RETRY_BASE_DELAY_MS),
            cap: Duration::from_millis(RETRY_MAX_DELAY_MS),
            jitter: RETRY_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter
    }

    /// Non-jittered delay for `attempt`: doubles per attempt, saturating at the cap.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }

    /// Jittered delay for `attempt`, drawing one sample from `source`.
    ///
    /// The result always lies in `[0, cap * (1 + jitter)]`.
    pub fn delay(&self, attempt: u32, source: &mut dyn JitterSource) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let sample = source.sample().clamp(-1.0, 1.0);
        let jittered = (base_ms + base_ms * self.jitter * sample).max(0.0);
        Duration::from_millis(jittered.round() as u64)
    }
}
