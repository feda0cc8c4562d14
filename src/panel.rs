//! Per-panel feeds.
//!
//! A [`PanelFeed`] owns one [`EventBuffer`] and wires its sources into it:
//! an optional push subscription and an optional poll loop. Panels share no
//! mutable state with each other; the push connection itself is owned by
//! the [`ConnectionManager`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::api::OutputLine;
use crate::buffer::{BufferEntry, DedupPolicy, EventBuffer};
use crate::bus::{SignalBus, SignalKind};
use crate::poll::{PollConfig, PollScheduler, PollSink, TailFetcher};
use crate::push::{
    BusMessage, ConnectionManager, LogLine, PushFrame, SubscriptionId, KIND_BUS_MESSAGE,
    KIND_COMMAND_OUTPUT, KIND_LOG, KIND_LOGS,
};

pub const LOG_PANEL_CAP: usize = 200;
pub const BUS_PANEL_CAP: usize = 100;
pub const COMMAND_OUTPUT_PANEL_CAP: usize = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Type-erased handle on a panel's poll loop.
trait PollControl: Send + Sync {
    fn stop(&self);
    fn is_active(&self) -> bool;
}

impl<E: Send + 'static> PollControl for PollScheduler<E> {
    fn stop(&self) {
        self.deactivate();
    }

    fn is_active(&self) -> bool {
        PollScheduler::is_active(self)
    }
}

struct PushAttachment {
    manager: Arc<ConnectionManager>,
    subscription: SubscriptionId,
}

pub struct PanelFeed<T> {
    name: String,
    buffer: Arc<Mutex<EventBuffer<T>>>,
    degraded: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    bus: Option<Arc<SignalBus>>,
    push: Mutex<Option<PushAttachment>>,
    poll: Mutex<Option<Box<dyn PollControl>>>,
}

impl<T: Clone + Send + 'static> PanelFeed<T> {
    pub fn new(name: impl Into<String>, cap: usize, dedup: DedupPolicy) -> Self {
        Self {
            name: name.into(),
            buffer: Arc::new(Mutex::new(EventBuffer::with_dedup(cap, dedup))),
            degraded: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            bus: None,
            push: Mutex::new(None),
            poll: Mutex::new(None),
        }
    }

    /// Report this panel's degraded banner on `bus`.
    pub fn with_signal_bus(mut self, bus: Arc<SignalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the contents with the first bulk load.
    pub fn initialize(&self, items: impl IntoIterator<Item = T>) {
        let entries = items
            .into_iter()
            .enumerate()
            .map(|(position, item)| BufferEntry::initial(position as u64, item));
        lock(&self.buffer).initialize(entries);
    }

    /// Append entries from any source the caller drives itself.
    pub fn append(&self, entries: impl IntoIterator<Item = BufferEntry<T>>) -> usize {
        if self.is_closed() {
            return 0;
        }
        lock(&self.buffer).append(entries)
    }

    /// Subscribe to `kinds` on `manager`, mapping each frame to entries.
    /// Replaces any earlier push attachment.
    pub fn attach_push<F>(&self, manager: Arc<ConnectionManager>, kinds: &[&str], map: F)
    where
        F: Fn(&PushFrame) -> Vec<BufferEntry<T>> + Send + Sync + 'static,
    {
        self.detach_push();
        if self.is_closed() {
            return;
        }
        let buffer = self.buffer.clone();
        let closed = self.closed.clone();
        let subscription = manager.subscribe(kinds, move |frame| {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            let entries = map(frame);
            if !entries.is_empty() {
                lock(&buffer).append(entries);
            }
        });
        *lock(&self.push) = Some(PushAttachment {
            manager,
            subscription,
        });
    }

    /// Start polling with `fetcher`, replacing any earlier poll loop. With no
    /// fetcher the panel simply does not poll. Must be called from within a
    /// tokio runtime.
    pub fn attach_poll<E, F>(
        &self,
        config: PollConfig,
        fetcher: Option<Arc<dyn TailFetcher<Entry = E>>>,
        map: F,
    ) -> bool
    where
        E: Send + 'static,
        F: Fn(E) -> BufferEntry<T> + Send + Sync + 'static,
    {
        self.detach_poll();
        if self.is_closed() {
            return false;
        }
        let scheduler = PollScheduler::new(self.name.clone(), config);
        let sink = Arc::new(PanelSink {
            stream: self.name.clone(),
            buffer: self.buffer.clone(),
            degraded: self.degraded.clone(),
            closed: self.closed.clone(),
            bus: self.bus.clone(),
            map,
        });
        let started = scheduler.activate(fetcher, sink);
        *lock(&self.poll) = Some(Box::new(scheduler));
        started
    }

    pub fn snapshot(&self) -> Vec<BufferEntry<T>> {
        lock(&self.buffer).snapshot()
    }

    pub fn payloads(&self) -> Vec<T> {
        lock(&self.buffer).payloads()
    }

    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.buffer).is_empty()
    }

    /// Whether the poll loop currently shows the degraded banner.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poll)
            .as_ref()
            .is_some_and(|poll| poll.is_active())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Unsubscribe from the push channel and stop polling. The buffer keeps
    /// its last contents. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.detach_push();
        self.detach_poll();
        info!(panel = %self.name, "panel closed");
    }

    fn detach_push(&self) {
        if let Some(attachment) = lock(&self.push).take() {
            attachment.manager.unsubscribe(attachment.subscription);
        }
    }

    fn detach_poll(&self) {
        if let Some(poll) = lock(&self.poll).take() {
            poll.stop();
        }
    }
}

impl<T> Drop for PanelFeed<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let push = self.push.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(attachment) = push {
            attachment.manager.unsubscribe(attachment.subscription);
        }
        let poll = self.poll.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(poll) = poll {
            poll.stop();
        }
    }
}

struct PanelSink<T, F> {
    stream: String,
    buffer: Arc<Mutex<EventBuffer<T>>>,
    degraded: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    bus: Option<Arc<SignalBus>>,
    map: F,
}

impl<T, E, F> PollSink<E> for PanelSink<T, F>
where
    T: Send,
    F: Fn(E) -> BufferEntry<T> + Send + Sync,
{
    fn on_entries(&self, entries: Vec<E>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mapped: Vec<BufferEntry<T>> = entries.into_iter().map(&self.map).collect();
        let accepted = lock(&self.buffer).append(mapped);
        debug!(panel = %self.stream, accepted, "polled entries appended");
    }

    fn on_degraded(&self, degraded: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.degraded.store(degraded, Ordering::SeqCst);
        if let Some(bus) = &self.bus {
            bus.emit(SignalKind::PollDegraded {
                stream: self.stream.clone(),
                degraded,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Dashboard panels
// ---------------------------------------------------------------------------

/// Agent log lines pushed as `logs` batches or single `log` frames. Each line
/// is ordered by its frame's arrival and then its position in the batch.
pub fn log_panel(manager: Arc<ConnectionManager>) -> PanelFeed<LogLine> {
    let panel = PanelFeed::new("logs", LOG_PANEL_CAP, DedupPolicy::None);
    panel.attach_push(manager, &[KIND_LOGS, KIND_LOG], |frame| match frame.log_lines() {
        Ok(lines) => lines
            .into_iter()
            .zip(0u32..)
            .map(|(line, index)| BufferEntry::pushed_item(frame.arrival(), index, line))
            .collect(),
        Err(error) => {
            debug!(error = %error, "dropping undecodable log frame");
            Vec::new()
        }
    });
    panel
}

/// Message-bus items.
pub fn bus_panel(manager: Arc<ConnectionManager>) -> PanelFeed<BusMessage> {
    let panel = PanelFeed::new("bus", BUS_PANEL_CAP, DedupPolicy::None);
    panel.attach_push(manager, &[KIND_BUS_MESSAGE], |frame| match frame.bus_message() {
        Ok(message) => vec![BufferEntry::pushed(frame.arrival(), message)],
        Err(error) => {
            debug!(error = %error, "dropping undecodable bus frame");
            Vec::new()
        }
    });
    panel
}

/// Tail of one command's output. Entries are keyed by offset so a line seen
/// through both the poll loop and the push channel is kept once.
pub fn command_output_panel(
    command_id: Option<&str>,
    fetcher: Option<Arc<dyn TailFetcher<Entry = OutputLine>>>,
    config: PollConfig,
    bus: Option<Arc<SignalBus>>,
) -> PanelFeed<OutputLine> {
    let name = match command_id {
        Some(id) => format!("command_output:{id}"),
        None => "command_output".to_string(),
    };
    let mut panel = PanelFeed::new(name, COMMAND_OUTPUT_PANEL_CAP, DedupPolicy::ByKey);
    if let Some(bus) = bus {
        panel = panel.with_signal_bus(bus);
    }
    let fetcher = if command_id.is_some() { fetcher } else { None };
    panel.attach_poll(config, fetcher, |line: OutputLine| {
        let key = line.offset.to_string();
        BufferEntry::polled(line.offset, line).with_key(key)
    });
    panel
}

impl PanelFeed<OutputLine> {
    /// Also accept `command_output` frames for `command_id` from the push
    /// channel.
    pub fn follow_pushed_output(&self, manager: Arc<ConnectionManager>, command_id: impl Into<String>) {
        let command_id = command_id.into();
        self.attach_push(manager, &[KIND_COMMAND_OUTPUT], move |frame| {
            match frame.command_output() {
                Ok(output) if output.command_id == command_id => {
                    let key = output.offset.to_string();
                    let line = OutputLine {
                        offset: output.offset,
                        text: output.text,
                        stream: output.stream,
                    };
                    vec![BufferEntry::pushed(frame.arrival(), line).with_key(key)]
                }
                Ok(_) => Vec::new(),
                Err(error) => {
                    debug!(error = %error, "dropping undecodable command output frame");
                    Vec::new()
                }
            }
        });
    }
}
