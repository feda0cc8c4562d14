use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::event_types::SignalKind;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSignal {
    pub id: String,
    pub seq: i64,
    pub source: String,
    pub kind: SignalKind,
    pub created_at: DateTime<Utc>,
}

/// Process-wide broadcast of connectivity signals.
pub struct SignalBus {
    tx: broadcast::Sender<SyncSignal>,
    seq: AtomicI64,
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            seq: AtomicI64::new(0),
        }
    }

    /// Publish a pre-built signal. Having no receivers is not an error.
    pub fn publish(&self, signal: SyncSignal) {
        if self.tx.send(signal).is_err() {
            tracing::trace!("signal bus has no receivers");
        }
    }

    /// Stamp and publish a signal in one call.
    pub fn emit(&self, kind: SignalKind) -> SyncSignal {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let signal = SyncSignal {
            id: Uuid::new_v4().to_string(),
            seq,
            source: kind.source().to_string(),
            kind,
            created_at: Utc::now(),
        };
        self.publish(signal.clone());
        signal
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.tx.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::event_types::SOURCE_POLL;

    #[tokio::test]
    async fn emit_stamps_sequence_and_source() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SignalKind::PollDegraded {
            stream: "output".into(),
            degraded: true,
        });
        bus.emit(SignalKind::PollDegraded {
            stream: "output".into(),
            degraded: false,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.source, SOURCE_POLL);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn emit_without_receivers_is_fine() {
        let bus = SignalBus::new();
        let signal = bus.emit(SignalKind::PollDegraded {
            stream: "s".into(),
            degraded: true,
        });
        assert_eq!(signal.seq, 0);
    }
}
