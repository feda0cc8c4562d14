use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::fetch::TailFetcher;
use super::state::{DegradedChange, PollConfig, PollState};

/// Receives what a poll loop produces.
pub trait PollSink<E>: Send + Sync {
    /// Non-empty batch, in the order the endpoint returned it.
    fn on_entries(&self, entries: Vec<E>);

    /// Raised after repeated failures, cleared by the next success.
    fn on_degraded(&self, degraded: bool);
}

struct ActivePoll {
    stop: watch::Sender<bool>,
    state: watch::Receiver<PollState>,
    handle: JoinHandle<()>,
}

/// Adaptive-rate tail poller.
///
/// Each activation starts a fresh loop with its own [`PollState`]. Fetches
/// are strictly sequential: the next timer is armed only after the previous
/// result has been handled.
pub struct PollScheduler<E> {
    name: String,
    config: PollConfig,
    active: Mutex<Option<ActivePoll>>,
    _entry: PhantomData<fn() -> E>,
}

impl<E: Send + 'static> PollScheduler<E> {
    pub fn new(name: impl Into<String>, config: PollConfig) -> Self {
        Self {
            name: name.into(),
            config,
            active: Mutex::new(None),
            _entry: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start polling with `fetcher`, replacing any running loop.
    ///
    /// Passing `None` stops any running loop and leaves the scheduler idle.
    /// Must be called from within a tokio runtime. Returns whether a loop
    /// was started.
    pub fn activate(
        &self,
        fetcher: Option<Arc<dyn TailFetcher<Entry = E>>>,
        sink: Arc<dyn PollSink<E>>,
    ) -> bool {
        self.deactivate();
        let Some(fetcher) = fetcher else {
            debug!(poller = %self.name, "no fetcher bound; poller stays idle");
            return false;
        };

        let state = PollState::new(self.config);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(state.clone());
        let handle = tokio::spawn(run_poll_loop(
            self.name.clone(),
            fetcher,
            sink,
            state,
            state_tx,
            stop_rx,
        ));

        info!(poller = %self.name, "poller activated");
        *self.lock_active() = Some(ActivePoll {
            stop: stop_tx,
            state: state_rx,
            handle,
        });
        true
    }

    /// Cancel the pending timer or in-flight fetch. No fetch is issued and
    /// no sink callback runs after this returns.
    pub fn deactivate(&self) {
        let active = self.lock_active().take();
        if let Some(active) = active {
            let _ = active.stop.send(true);
            active.handle.abort();
            info!(poller = %self.name, "poller deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Counters of the running loop as of its last completed fetch.
    pub fn state(&self) -> Option<PollState> {
        self.lock_active()
            .as_ref()
            .map(|active| active.state.borrow().clone())
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActivePoll>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Drop for PollScheduler<E> {
    fn drop(&mut self) {
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = active {
            let _ = active.stop.send(true);
            active.handle.abort();
        }
    }
}

async fn run_poll_loop<E: Send + 'static>(
    name: String,
    fetcher: Arc<dyn TailFetcher<Entry = E>>,
    sink: Arc<dyn PollSink<E>>,
    mut state: PollState,
    state_tx: watch::Sender<PollState>,
    mut stop: watch::Receiver<bool>,
) {
    let mut delay = Duration::ZERO;
    loop {
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => return,
            }
        }

        let cursor = state.cursor();
        let result = tokio::select! {
            result = fetcher.fetch(cursor) => result,
            _ = stop.changed() => return,
        };
        if *stop.borrow() {
            return;
        }

        let outcome = match result {
            Ok(page) => {
                let count = page.entries.len();
                let outcome = state.record_success(count, page.next_cursor);
                if count > 0 {
                    sink.on_entries(page.entries);
                }
                outcome
            }
            Err(error) => {
                warn!(
                    poller = %name,
                    error = %error,
                    retryable = error.is_retryable(),
                    "poll fetch failed"
                );
                state.record_failure()
            }
        };

        match outcome.degraded {
            Some(DegradedChange::Raised) => {
                warn!(poller = %name, errors = state.error_count(), "poller degraded");
                sink.on_degraded(true);
            }
            Some(DegradedChange::Cleared) => {
                info!(poller = %name, "poller recovered");
                sink.on_degraded(false);
            }
            None => {}
        }

        debug!(
            poller = %name,
            idle_count = state.idle_count(),
            error_count = state.error_count(),
            cursor = ?state.cursor().map(|c| c.value()),
            delay_ms = outcome.next_delay.as_millis() as u64,
            "next poll scheduled"
        );
        state_tx.send_replace(state.clone());
        delay = outcome.next_delay;
    }
}
