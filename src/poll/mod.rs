//! Adaptive polling of tail endpoints.
//!
//! Used for high-volume streams (command output) where the push channel is
//! not authoritative:
//! - `state`: idle/error counters, cursor and the delay table
//! - `fetch`: the fetch contract and the HTTP command-output fetcher
//! - `scheduler`: the cancellable chained-timer loop

mod fetch;
mod scheduler;
mod state;

pub use fetch::{CommandOutputFetcher, FetchError, FnFetcher, PollPage, TailFetcher};
pub use scheduler::{PollScheduler, PollSink};
pub use state::{
    Cursor, DegradedChange, PollConfig, PollDelays, PollOutcome, PollState, IDLE_MEDIUM_THRESHOLD,
    IDLE_SLOW_THRESHOLD,
};
