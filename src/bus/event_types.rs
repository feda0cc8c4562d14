//! Signal sources and payloads carried on the [`SignalBus`](super::SignalBus).

use serde::{Deserialize, Serialize};

use crate::health::ConnectivityQuality;
use crate::push::ConnectionState;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

pub const SOURCE_PUSH: &str = "push";
pub const SOURCE_POLL: &str = "poll";
pub const SOURCE_HEALTH: &str = "health";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    /// The push connection entered `state`.
    ConnectionChanged { state: ConnectionState },
    /// A poll stream raised or cleared its degraded banner.
    PollDegraded { stream: String, degraded: bool },
    /// Result of one health probe.
    Health {
        quality: ConnectivityQuality,
        latency_ms: Option<u64>,
    },
}

impl SignalKind {
    pub fn source(&self) -> &'static str {
        match self {
            Self::ConnectionChanged { .. } => SOURCE_PUSH,
            Self::PollDegraded { .. } => SOURCE_POLL,
            Self::Health { .. } => SOURCE_HEALTH,
        }
    }
}
