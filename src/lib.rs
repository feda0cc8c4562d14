//! Realtime synchronization layer for the swarm monitoring dashboard.
//!
//! Keeps dashboard panels current with a remote swarm through two channels:
//! - `push`: one persistent duplex connection carrying typed event frames,
//!   reconnected with capped exponential backoff (`retry`)
//! - `poll`: adaptive-rate polling of tail endpoints for high-volume streams
//!
//! Both feed a bounded per-panel `buffer` through `panel`. `health` runs a
//! coarse periodic liveness probe, and `bus` folds push, poll and health
//! signals into the connectivity indicator.

pub mod api;
pub mod buffer;
pub mod bus;
pub mod config;
pub mod health;
pub mod panel;
pub mod poll;
pub mod push;
pub mod retry;

pub use api::{ApiClient, ApiError, OutputLine};
pub use buffer::{BufferEntry, DedupPolicy, EventBuffer, OrderKey, SourceTag};
pub use bus::{ConnectivityIndicator, IndicatorView, SignalBus, SignalKind, SyncSignal};
pub use config::{ConfigError, SyncConfig};
pub use health::{ConnectivityQuality, HealthMonitor, HealthProbe, ProbeReport, ProbeTarget};
pub use panel::PanelFeed;
pub use poll::{FetchError, PollConfig, PollScheduler, TailFetcher};
pub use push::{ConnectionManager, ConnectionState, OutboundMessage, PushFrame, TransportError};
pub use retry::{JitterSource, RetryPolicy};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Frame(#[from] push::FrameError),
}

const DEFAULT_LOG_FILTER: &str = "swarmdeck=debug,info";

/// Install the fmt subscriber, honouring `RUST_LOG`. Safe to call more than
/// once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
