//! Scripted tail fetcher and a recording poll sink.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use swarmdeck_lib::poll::{Cursor, FetchError, PollPage, PollSink, TailFetcher};

pub type FetchResult<E> = Result<PollPage<E>, FetchError>;

/// Replays scripted results, then answers with empty pages.
pub struct FakeFetcher<E> {
    script: Mutex<VecDeque<FetchResult<E>>>,
    latency: Duration,
    calls: Mutex<Vec<Instant>>,
    cursors: Mutex<Vec<Option<Cursor>>>,
    completed: Mutex<usize>,
}

impl<E> FakeFetcher<E> {
    pub fn new(script: Vec<FetchResult<E>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            cursors: Mutex::new(Vec::new()),
            completed: Mutex::new(0),
        }
    }

    pub fn always_empty() -> Self {
        Self::new(Vec::new())
    }

    /// Every fetch takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cursors(&self) -> Vec<Option<Cursor>> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn completed(&self) -> usize {
        *self.completed.lock().unwrap()
    }
}

pub fn failure<E>() -> FetchResult<E> {
    Err(FetchError::Other("backend unavailable".into()))
}

pub fn page<E>(entries: Vec<E>, next_cursor: Option<u64>) -> FetchResult<E> {
    Ok(PollPage::new(entries, next_cursor.map(Cursor::new)))
}

pub fn empty<E>() -> FetchResult<E> {
    Ok(PollPage::empty())
}

#[async_trait]
impl<E: Send + 'static> TailFetcher for FakeFetcher<E> {
    type Entry = E;

    async fn fetch(&self, cursor: Option<Cursor>) -> FetchResult<E> {
        self.calls.lock().unwrap().push(Instant::now());
        self.cursors.lock().unwrap().push(cursor);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        *self.completed.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(PollPage::empty()))
    }
}

/// Records what a poll loop delivers.
pub struct RecordingSink<E> {
    entries: Mutex<Vec<E>>,
    batches: Mutex<usize>,
    degraded: Mutex<Vec<bool>>,
}

impl<E: Clone> RecordingSink<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            batches: Mutex::new(0),
            degraded: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<E> {
        self.entries.lock().unwrap().clone()
    }

    pub fn batches(&self) -> usize {
        *self.batches.lock().unwrap()
    }

    pub fn degraded_events(&self) -> Vec<bool> {
        self.degraded.lock().unwrap().clone()
    }
}

impl<E: Send> PollSink<E> for RecordingSink<E> {
    fn on_entries(&self, entries: Vec<E>) {
        *self.batches.lock().unwrap() += 1;
        self.entries.lock().unwrap().extend(entries);
    }

    fn on_degraded(&self, degraded: bool) {
        self.degraded.lock().unwrap().push(degraded);
    }
}
