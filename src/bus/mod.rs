//! Connectivity signals shared across panels.
//!
//! - `SignalBus`: in-memory broadcast of push, poll and health signals
//! - `ConnectivityIndicator`: folds signals into the quality indicator and
//!   the degraded banner

mod event_bus;
mod event_types;
mod indicator;

pub use event_bus::{SignalBus, SyncSignal};
pub use event_types::{SignalKind, SOURCE_HEALTH, SOURCE_POLL, SOURCE_PUSH};
pub use indicator::{ConnectivityIndicator, IndicatorView};
