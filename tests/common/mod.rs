//! Shared fakes for the sync-layer integration tests.

#![allow(dead_code)]

pub mod fake_fetcher;
pub mod fake_transport;

use std::time::Duration;

pub use fake_fetcher::{FakeFetcher, RecordingSink};
pub use fake_transport::{FakeTransport, Script, SessionHandle};

/// Let spawned tasks run until they block, without crossing any timer
/// longer than a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Millisecond gaps between consecutive instants.
pub fn gaps_ms(instants: &[tokio::time::Instant]) -> Vec<u64> {
    instants
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
        .collect()
}
