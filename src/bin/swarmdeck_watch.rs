use std::sync::Arc;
use std::time::Duration;

use swarmdeck_lib::api::ApiClient;
use swarmdeck_lib::bus::{ConnectivityIndicator, SignalBus};
use swarmdeck_lib::config::SyncConfig;
use swarmdeck_lib::health::{HealthMonitor, HealthProbe};
use swarmdeck_lib::panel::{bus_panel, command_output_panel, log_panel};
use swarmdeck_lib::poll::{CommandOutputFetcher, TailFetcher};
use swarmdeck_lib::push::{
    ConnectionManager, KIND_AGENT_STATUS, KIND_BUS_MESSAGE, KIND_LOG, KIND_LOGS, KIND_STATUS,
    KIND_TASK_UPDATE,
};
use swarmdeck_lib::OutputLine;

const RENDER_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("swarmdeck_watch failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    swarmdeck_lib::init_tracing();

    let mut config = SyncConfig::from_env().map_err(|e| e.to_string())?;
    let mut command_id: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }
        if let Some(value) = arg.strip_prefix("--base-url=") {
            config.base_url = value.to_string();
            continue;
        }
        if arg == "--base-url" {
            config.base_url = args
                .next()
                .ok_or_else(|| "--base-url requires a value".to_string())?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--command=") {
            command_id = Some(value.to_string());
            continue;
        }
        if arg == "--command" {
            command_id = Some(
                args.next()
                    .ok_or_else(|| "--command requires a value".to_string())?,
            );
            continue;
        }
        if let Some(value) = arg.strip_prefix("--api-key=") {
            config.api_key = Some(value.to_string());
            continue;
        }
        if arg == "--api-key" {
            config.api_key = Some(
                args.next()
                    .ok_or_else(|| "--api-key requires a value".to_string())?,
            );
            continue;
        }
        return Err(format!("unknown argument '{arg}'. Use --help for usage"));
    }
    config.validate().map_err(|e| e.to_string())?;

    let bus = Arc::new(SignalBus::new());
    let (indicator_task, mut indicator) = ConnectivityIndicator::start(bus.subscribe());
    let api = ApiClient::new(&config).map_err(|e| e.to_string())?;
    let manager = Arc::new(
        ConnectionManager::from_config(&config, Some(bus.clone())).map_err(|e| e.to_string())?,
    );

    let logs = log_panel(manager.clone());
    let messages = bus_panel(manager.clone());
    manager.subscribe(&[KIND_LOGS, KIND_LOG], |frame| {
        for line in frame.log_lines().unwrap_or_default() {
            println!(
                "log {} {}: {}",
                line.level.as_deref().unwrap_or("info"),
                line.agent_id.as_deref().unwrap_or("-"),
                line.message
            );
        }
    });
    manager.subscribe(&[KIND_BUS_MESSAGE], |frame| {
        if let Ok(message) = frame.bus_message() {
            println!(
                "bus {} -> {}: {}",
                message.sender.as_deref().unwrap_or("-"),
                message.topic.as_deref().unwrap_or("-"),
                message.content
            );
        }
    });
    manager.subscribe(&[KIND_STATUS, KIND_AGENT_STATUS, KIND_TASK_UPDATE], |frame| {
        match frame.status() {
            Ok(update) => println!(
                "[{}] {} {}",
                frame.kind(),
                update.agent_id.or(update.task_id).unwrap_or_default(),
                update.status
            ),
            Err(error) => tracing::debug!(error = %error, "unreadable status frame"),
        }
    });

    let fetcher = command_id.as_deref().map(|id| {
        Arc::new(CommandOutputFetcher::new(api.clone(), id)) as Arc<dyn TailFetcher<Entry = OutputLine>>
    });
    let output = command_output_panel(
        command_id.as_deref(),
        fetcher,
        config.poll_config(),
        Some(bus.clone()),
    );
    if let Some(id) = command_id.as_deref() {
        output.follow_pushed_output(manager.clone(), id);
    }

    let monitor = HealthMonitor::start(
        HealthProbe::new(Arc::new(api), config.health_slow_threshold()),
        config.health_interval(),
        Some(bus.clone()),
    );

    println!("watching {} (push {})", config.api_base(), manager.url());
    manager.connect();

    let mut last_offset: Option<u64> = None;
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(error) = result {
                    eprintln!("failed to listen for ctrl-c: {error}");
                }
                break;
            }
            changed = indicator.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = indicator.borrow_and_update().clone();
                let banner = if view.banner() {
                    format!(" (degraded: {})", view.degraded_streams.join(", "))
                } else {
                    String::new()
                };
                println!("connectivity: {} / push {}{banner}", view.quality, view.connection);
            }
            _ = ticker.tick() => {
                for line in output.payloads() {
                    if last_offset.is_some_and(|seen| line.offset <= seen) {
                        continue;
                    }
                    println!("out {:>6} {}", line.offset, line.text);
                    last_offset = Some(line.offset);
                }
            }
        }
    }

    output.close();
    messages.close();
    logs.close();
    monitor.stop();
    manager.dispose();
    drop(bus);
    indicator_task.abort();
    println!(
        "stopped: {} log lines, {} bus messages, {} output lines retained",
        logs.len(),
        messages.len(),
        output.len()
    );
    Ok(())
}

fn print_help() {
    println!("Terminal monitor for a swarm dashboard backend");
    println!();
    println!("Usage:");
    println!("  swarmdeck_watch [options]");
    println!();
    println!("Options:");
    println!("  --base-url=URL    Backend base URL (default: $SWARMDECK_BASE_URL or http://127.0.0.1:8000)");
    println!("  --command=ID      Tail the output of this command");
    println!("  --api-key=KEY     API key sent as X-API-Key (default: $SWARMDECK_API_KEY)");
    println!("  -h, --help        Show this help");
}
