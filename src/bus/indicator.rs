use std::collections::BTreeSet;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::event_bus::SyncSignal;
use super::event_types::SignalKind;
use crate::health::ConnectivityQuality;
use crate::push::ConnectionState;

/// What the dashboard shows about connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndicatorView {
    pub quality: ConnectivityQuality,
    pub connection: ConnectionState,
    /// Poll streams currently showing the degraded banner.
    pub degraded_streams: Vec<String>,
}

impl IndicatorView {
    pub fn banner(&self) -> bool {
        !self.degraded_streams.is_empty()
    }
}

/// Folds bus signals into an [`IndicatorView`].
#[derive(Debug, Clone)]
pub struct ConnectivityIndicator {
    connection: ConnectionState,
    health: Option<ConnectivityQuality>,
    degraded: BTreeSet<String>,
}

impl ConnectivityIndicator {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            health: None,
            degraded: BTreeSet::new(),
        }
    }

    pub fn apply(&mut self, kind: &SignalKind) {
        match kind {
            SignalKind::ConnectionChanged { state } => self.connection = *state,
            SignalKind::PollDegraded { stream, degraded } => {
                if *degraded {
                    self.degraded.insert(stream.clone());
                } else {
                    self.degraded.remove(stream);
                }
            }
            SignalKind::Health { quality, .. } => self.health = Some(*quality),
        }
    }

    /// An exhausted push channel overrides whatever the last probe said.
    pub fn view(&self) -> IndicatorView {
        let quality = if self.connection == ConnectionState::ClosedPermanently {
            ConnectivityQuality::Disconnected
        } else {
            self.health.unwrap_or(ConnectivityQuality::Healthy)
        };
        IndicatorView {
            quality,
            connection: self.connection,
            degraded_streams: self.degraded.iter().cloned().collect(),
        }
    }

    /// Spawn a task folding `rx` into a watch channel. The task ends when
    /// the bus is dropped.
    pub fn start(
        mut rx: broadcast::Receiver<SyncSignal>,
    ) -> (JoinHandle<()>, watch::Receiver<IndicatorView>) {
        let mut indicator = Self::new();
        let (tx, view_rx) = watch::channel(indicator.view());
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        indicator.apply(&signal.kind);
                        tx.send_if_modified(|current| {
                            let next = indicator.view();
                            if *current == next {
                                false
                            } else {
                                *current = next;
                                true
                            }
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("connectivity indicator lagged, dropped {n} signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        (handle, view_rx)
    }
}

impl Default for ConnectivityIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SignalBus;

    #[test]
    fn closed_permanently_forces_disconnected() {
        let mut indicator = ConnectivityIndicator::new();
        indicator.apply(&SignalKind::Health {
            quality: ConnectivityQuality::Slow,
            latency_ms: Some(2500),
        });
        assert_eq!(indicator.view().quality, ConnectivityQuality::Slow);

        indicator.apply(&SignalKind::ConnectionChanged {
            state: ConnectionState::ClosedPermanently,
        });
        assert_eq!(indicator.view().quality, ConnectivityQuality::Disconnected);

        indicator.apply(&SignalKind::ConnectionChanged {
            state: ConnectionState::Connected,
        });
        assert_eq!(indicator.view().quality, ConnectivityQuality::Slow);
    }

    #[test]
    fn banner_tracks_each_stream() {
        let mut indicator = ConnectivityIndicator::new();
        for stream in ["a", "b"] {
            indicator.apply(&SignalKind::PollDegraded {
                stream: stream.into(),
                degraded: true,
            });
        }
        indicator.apply(&SignalKind::PollDegraded {
            stream: "a".into(),
            degraded: false,
        });
        let view = indicator.view();
        assert!(view.banner());
        assert_eq!(view.degraded_streams, vec!["b".to_string()]);

        indicator.apply(&SignalKind::PollDegraded {
            stream: "b".into(),
            degraded: false,
        });
        assert!(!indicator.view().banner());
    }

    #[tokio::test]
    async fn start_publishes_views_until_bus_drops() {
        let bus = SignalBus::new();
        let (handle, mut view) = ConnectivityIndicator::start(bus.subscribe());

        bus.emit(SignalKind::Health {
            quality: ConnectivityQuality::Degraded,
            latency_ms: Some(12),
        });
        view.changed().await.unwrap();
        assert_eq!(view.borrow().quality, ConnectivityQuality::Degraded);

        drop(bus);
        handle.await.unwrap();
    }
}
