//! Coarse liveness probe feeding the connectivity indicator.
//!
//! Independent of the push and poll channels: one round trip on a fixed
//! repeating interval, classified by outcome and latency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::bus::{SignalBus, SignalKind};

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(2000);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(30_000);
/// Shorter intervals passed to [`HealthMonitor::start`] are raised to this.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityQuality {
    Healthy,
    Slow,
    Degraded,
    Disconnected,
}

impl std::fmt::Display for ConnectivityQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Slow => "slow",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Raw outcome of one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Success,
    /// The endpoint answered with a non-success status.
    Failed { status: u16 },
    /// The round trip did not complete.
    Unreachable { reason: String },
}

#[async_trait]
pub trait ProbeTarget: Send + Sync {
    async fn probe(&self) -> ProbeStatus;
}

#[async_trait]
impl ProbeTarget for ApiClient {
    async fn probe(&self) -> ProbeStatus {
        match self.health().await {
            Ok(status) if status.is_success() => ProbeStatus::Success,
            Ok(status) => ProbeStatus::Failed {
                status: status.as_u16(),
            },
            Err(ApiError::Status { status, .. }) => ProbeStatus::Failed { status },
            Err(error) => ProbeStatus::Unreachable {
                reason: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub quality: ConnectivityQuality,
    pub latency: Duration,
    pub checked_at: DateTime<Utc>,
}

impl ProbeReport {
    /// Latency worth showing; `None` when the probe never completed.
    pub fn latency_ms(&self) -> Option<u64> {
        match self.quality {
            ConnectivityQuality::Disconnected => None,
            _ => Some(self.latency.as_millis() as u64),
        }
    }
}

pub fn classify(status: &ProbeStatus, latency: Duration, slow_threshold: Duration) -> ConnectivityQuality {
    match status {
        ProbeStatus::Success if latency < slow_threshold => ConnectivityQuality::Healthy,
        ProbeStatus::Success => ConnectivityQuality::Slow,
        ProbeStatus::Failed { .. } => ConnectivityQuality::Degraded,
        ProbeStatus::Unreachable { .. } => ConnectivityQuality::Disconnected,
    }
}

#[derive(Clone)]
pub struct HealthProbe {
    target: Arc<dyn ProbeTarget>,
    slow_threshold: Duration,
}

impl HealthProbe {
    pub fn new(target: Arc<dyn ProbeTarget>, slow_threshold: Duration) -> Self {
        Self {
            target,
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// One timed round trip.
    pub async fn check(&self) -> ProbeReport {
        let started = Instant::now();
        let status = self.target.probe().await;
        let latency = started.elapsed();
        let quality = classify(&status, latency, self.slow_threshold);
        match &status {
            ProbeStatus::Unreachable { reason } => {
                warn!(reason = %reason, "health probe unreachable")
            }
            ProbeStatus::Failed { status } => warn!(status, "health probe failed"),
            ProbeStatus::Success => {}
        }
        debug!(
            quality = %quality,
            latency_ms = latency.as_millis() as u64,
            "health probe completed"
        );
        ProbeReport {
            quality,
            latency,
            checked_at: Utc::now(),
        }
    }
}

/// Runs a [`HealthProbe`] on a fixed interval until stopped or dropped.
pub struct HealthMonitor {
    handle: JoinHandle<()>,
    latest: watch::Receiver<Option<ProbeReport>>,
}

impl HealthMonitor {
    /// The first probe runs immediately. Must be called from within a
    /// tokio runtime.
    pub fn start(probe: HealthProbe, every: Duration, bus: Option<Arc<SignalBus>>) -> Self {
        if every < MIN_PROBE_INTERVAL {
            warn!(
                requested_ms = every.as_millis() as u64,
                min_ms = MIN_PROBE_INTERVAL.as_millis() as u64,
                "probe interval too short; clamping"
            );
        }
        let every = every.max(MIN_PROBE_INTERVAL);
        let (tx, latest) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = probe.check().await;
                if let Some(bus) = &bus {
                    bus.emit(SignalKind::Health {
                        quality: report.quality,
                        latency_ms: report.latency_ms(),
                    });
                }
                tx.send_replace(Some(report));
            }
        });
        info!(interval_ms = every.as_millis() as u64, "health monitor started");
        Self { handle, latest }
    }

    pub fn latest(&self) -> Option<ProbeReport> {
        self.latest.borrow().clone()
    }

    /// Receiver that observes every new report.
    pub fn watch(&self) -> watch::Receiver<Option<ProbeReport>> {
        self.latest.clone()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
