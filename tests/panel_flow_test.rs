//! Panels fed by the push channel and the poll loop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::fake_fetcher::{failure, page};
use common::{settle, FakeFetcher, FakeTransport};
use swarmdeck_lib::api::OutputLine;
use swarmdeck_lib::buffer::{BufferEntry, DedupPolicy, OrderKey, SourceTag};
use swarmdeck_lib::bus::{SignalBus, SignalKind};
use swarmdeck_lib::panel::{bus_panel, command_output_panel, log_panel, PanelFeed};
use swarmdeck_lib::poll::{PollConfig, TailFetcher};
use swarmdeck_lib::push::{ConnectionManager, ConnectionOptions, KIND_LOG};
use swarmdeck_lib::retry::SequenceJitter;

fn connected_manager(transport: &Arc<FakeTransport>) -> Arc<ConnectionManager> {
    let manager = ConnectionManager::new("ws://swarm.test/ws", transport.clone(), ConnectionOptions::default())
        .with_jitter(SequenceJitter::none());
    manager.connect();
    Arc::new(manager)
}

fn output(offset: u64, text: &str) -> OutputLine {
    OutputLine {
        offset,
        text: text.to_string(),
        stream: None,
    }
}

fn offsets(panel: &PanelFeed<OutputLine>) -> Vec<u64> {
    panel.payloads().iter().map(|line| line.offset).collect()
}

#[tokio::test(start_paused = true)]
async fn initial_load_then_pushed_events_evict_oldest() {
    let transport = FakeTransport::accepting();
    let manager = connected_manager(&transport);
    let panel: PanelFeed<String> = PanelFeed::new("letters", 5, DedupPolicy::None);
    panel.attach_push(manager.clone(), &[KIND_LOG], |frame| {
        frame
            .log_lines()
            .unwrap_or_default()
            .into_iter()
            .map(|line| BufferEntry::pushed(frame.arrival(), line.message))
            .collect()
    });
    panel.initialize(["a", "b", "c"].map(String::from));
    settle().await;

    let session = transport.latest_session();
    let mut snapshots = Vec::new();
    for letter in ["d", "e", "f"] {
        session.push_text(&format!(r#"{{"type":"log","message":"{letter}"}}"#));
        settle().await;
        snapshots.push(panel.payloads());
    }

    assert_eq!(
        snapshots,
        vec![
            vec!["a", "b", "c", "d"],
            vec!["a", "b", "c", "d", "e"],
            vec!["b", "c", "d", "e", "f"],
        ]
    );
    let sources: Vec<SourceTag> = panel.snapshot().iter().map(|entry| entry.source()).collect();
    assert_eq!(
        sources,
        vec![SourceTag::Initial, SourceTag::Initial, SourceTag::Push, SourceTag::Push, SourceTag::Push]
    );
}

#[tokio::test(start_paused = true)]
async fn log_and_bus_panels_pick_their_own_frames() {
    let transport = FakeTransport::accepting();
    let manager = connected_manager(&transport);
    let logs = log_panel(manager.clone());
    let messages = bus_panel(manager.clone());
    settle().await;

    let session = transport.latest_session();
    session.push_text(r#"{"type":"logs","lines":[{"message":"boot"},{"message":"ready","level":"info"}]}"#);
    session.push_text(r#"{"type":"bus_message","sender":"planner","content":{"step":1}}"#);
    session.push_text(r#"{"type":"log","message":"tick"}"#);
    session.push_text(r#"{"type":"logs","lines":"not a list"}"#);
    settle().await;

    let lines: Vec<String> = logs.payloads().into_iter().map(|line| line.message).collect();
    assert_eq!(lines, vec!["boot", "ready", "tick"]);
    let keys: Vec<OrderKey> = logs.snapshot().iter().map(|entry| entry.order()).collect();
    assert_eq!(
        keys,
        vec![
            OrderKey::Batch { arrival: 0, index: 0 },
            OrderKey::Batch { arrival: 0, index: 1 },
            OrderKey::Batch { arrival: 2, index: 0 },
        ]
    );
    assert_eq!(messages.len(), 1);
    assert_eq!(messages.payloads()[0].sender.as_deref(), Some("planner"));
}

#[tokio::test(start_paused = true)]
async fn command_output_from_both_sources_is_kept_once() {
    let transport = FakeTransport::accepting();
    let manager = connected_manager(&transport);
    let fetcher = Arc::new(FakeFetcher::new(vec![page(
        vec![output(1, "compiling"), output(2, "linking")],
        Some(2),
    )]));
    let tail: Arc<dyn TailFetcher<Entry = OutputLine>> = fetcher.clone();
    let panel = command_output_panel(Some("cmd-7"), Some(tail), PollConfig::default(), None);
    panel.follow_pushed_output(manager.clone(), "cmd-7");
    settle().await;
    assert_eq!(offsets(&panel), vec![1, 2]);

    let session = transport.latest_session();
    session.push_text(r#"{"type":"command_output","command_id":"cmd-7","offset":2,"text":"linking"}"#);
    session.push_text(r#"{"type":"command_output","command_id":"cmd-7","offset":3,"text":"done"}"#);
    session.push_text(r#"{"type":"command_output","command_id":"other","offset":4,"text":"noise"}"#);
    settle().await;

    assert_eq!(offsets(&panel), vec![1, 2, 3]);
    let sources: Vec<SourceTag> = panel.snapshot().iter().map(|entry| entry.source()).collect();
    assert_eq!(sources, vec![SourceTag::Poll, SourceTag::Poll, SourceTag::Push]);
}

#[tokio::test(start_paused = true)]
async fn degraded_banner_reaches_panel_and_bus() {
    let fetcher = Arc::new(FakeFetcher::new(vec![
        failure(),
        failure(),
        failure(),
        page(vec![output(10, "recovered")], Some(10)),
    ]));
    let bus = Arc::new(SignalBus::new());
    let mut signals = bus.subscribe();
    let tail: Arc<dyn TailFetcher<Entry = OutputLine>> = fetcher.clone();
    let panel = command_output_panel(Some("cmd-9"), Some(tail), PollConfig::default(), Some(bus.clone()));

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert!(panel.is_degraded());

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert!(!panel.is_degraded());
    assert_eq!(offsets(&panel), vec![10]);

    let mut banner = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        if let SignalKind::PollDegraded { stream, degraded } = signal.kind {
            banner.push((stream, degraded));
        }
    }
    assert_eq!(
        banner,
        vec![
            ("command_output:cmd-9".to_string(), true),
            ("command_output:cmd-9".to_string(), false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn closing_a_panel_detaches_every_source() {
    let transport = FakeTransport::accepting();
    let manager = connected_manager(&transport);
    let fetcher = Arc::new(FakeFetcher::new(vec![page(vec![output(1, "first")], Some(1))]));
    let tail: Arc<dyn TailFetcher<Entry = OutputLine>> = fetcher.clone();
    let panel = command_output_panel(Some("cmd-1"), Some(tail), PollConfig::default(), None);
    panel.follow_pushed_output(manager.clone(), "cmd-1");
    settle().await;
    assert!(panel.is_polling());

    panel.close();
    assert!(!panel.is_polling());
    transport
        .latest_session()
        .push_text(r#"{"type":"command_output","command_id":"cmd-1","offset":5,"text":"late"}"#);
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(offsets(&panel), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn panel_without_a_command_does_not_poll() {
    let fetcher = Arc::new(FakeFetcher::<OutputLine>::always_empty());
    let tail: Arc<dyn TailFetcher<Entry = OutputLine>> = fetcher.clone();
    let panel = command_output_panel(None, Some(tail), PollConfig::default(), None);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!panel.is_polling());
    assert_eq!(fetcher.call_count(), 0);
}
