mod app;
mod domain;
mod infrastructure;

use crate::domain::controller::ControllerState;
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::replay::{self, ReplayLink};
use crate::infrastructure::bluetooth::BluetoothService;
use crate::infrastructure::publisher::Publisher;
use crate::infrastructure::{logging, report_queue, serial};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info, warn};

const STDIN_SCRIPT: &str = "-";

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<PathBuf>,
    script: Option<String>,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  ble_pad_bridge [--config <settings.json>] [<event-script.jsonl> | -]");
    eprintln!();
    eprintln!("Link events are read as JSON lines from the script, or stdin when omitted.");
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| format!("`{}` needs a path", arg))?;
                parsed.config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') && flag != STDIN_SCRIPT => {
                return Err(format!("unknown option `{}`", flag));
            }
            script => {
                if parsed.script.is_some() {
                    return Err(format!("unexpected argument `{}`", script));
                }
                parsed.script = Some(script.to_string());
            }
        }
    }
    Ok(parsed)
}

async fn feed_events(script: Option<&str>, service: &mut BluetoothService) -> Result<()> {
    match script {
        Some(path) if path != STDIN_SCRIPT => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open event script {}", path))?;
            info!("Replaying link events from {}", path);
            replay::feed(BufReader::new(file), service).await?;
        }
        _ => {
            info!("Reading link events from stdin");
            replay::feed(BufReader::new(tokio::io::stdin()), service).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let all_args: Vec<String> = std::env::args().collect();
    if all_args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let args = match parse_args(&all_args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    let (settings_service, load_error) = match &args.config {
        Some(path) => (SettingsService::load(path.clone())?, None),
        None => SettingsService::new()?,
    };

    let logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting BLE pad bridge");
    if let Some(e) = load_error {
        warn!("Using default settings: {:#}", e);
    }
    if !settings_service.path().exists() {
        match settings_service.save() {
            Ok(()) => info!("Wrote default settings to {}", settings_service.path().display()),
            Err(e) => warn!("Could not write default settings: {}", e),
        }
    }
    let settings = settings_service.get().clone();
    info!(
        "Target device {}, settings from {}",
        settings.target_device_name,
        settings_service.path().display()
    );

    let transport = serial::open_transport(&settings.serial)?;
    let (producer, consumer) = report_queue::channel(settings.queue_capacity);
    info!("Report queue holds up to {} reports", producer.capacity());
    let tracker = ControllerState::new(settings.publish.clone());
    let publisher = Publisher::new(transport, settings.debug_echo_output);

    let mut consumer_task =
        tokio::task::spawn_blocking(move || app::run_consumer(consumer, tracker, publisher));

    let mut service = BluetoothService::new(&settings, Box::new(ReplayLink::new()), producer);
    service
        .start()
        .context("Bluetooth bring-up failed")?;

    // The consumer can stop first on corrupt data, while the feed is still waiting for input.
    let (feed_result, consumer_result) = tokio::select! {
        result = feed_events(args.script.as_deref(), &mut service) => (result, None),
        joined = &mut consumer_task => (Ok(()), Some(joined)),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            (Ok(()), None)
        }
    };

    match service.peer() {
        Some(peer) => info!(
            "Event feed ended in state {}, peer {}",
            service.state(),
            peer.address
        ),
        None => info!("Event feed ended in state {}", service.state()),
    }
    let queue = service.queue();
    if queue.dropped() > 0 {
        warn!("{} reports dropped on a full queue", queue.dropped());
    }
    if !queue.is_empty() {
        info!("Draining {} queued reports", queue.len());
    }

    // Dropping the service closes the queue, which ends the consumer.
    drop(service);
    let consumer_result = match consumer_result {
        Some(joined) => joined,
        None => consumer_task.await,
    };
    let stats = match consumer_result.context("Report consumer panicked")? {
        Ok(stats) => stats,
        Err(e) => {
            error!("Stopping on corrupt controller data: {}", e);
            // a pending stdin read would hold up runtime shutdown
            drop(logging_guard);
            std::process::exit(1);
        }
    };
    feed_result?;
    info!(
        "Done: {} reports, {} lines published, {} write failures",
        stats.reports, stats.published, stats.write_failures
    );
    Ok(())
}
