//! Wearable Telemetry Agent CLI
//!
//! Runs the telemetry engine against file-backed sensors and inspects its stores.

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wearable_telemetry_agent::{
    config::Config,
    core::{AggregateRecord, SleepRecord},
    events::{DisplayState, EngineEvent, EventSource},
    notify::LogChannel,
    service::{read_display_state, write_display_state, ClockSource, FileDisplaySource, Service},
    stats::{EngineStats, StatsSnapshot},
    storage::{FileStorage, Storage, Store, StreamId},
    Engine, FileSensorProvider, VERSION,
};

#[derive(Parser)]
#[command(name = "telemetry-agent")]
#[command(version = VERSION)]
#[command(about = "On-device wearable telemetry aggregation and sleep capture", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent in the foreground
    Start,

    /// Set the display state seen by a running agent
    Screen {
        #[arg(value_enum)]
        state: ScreenArg,
    },

    /// Show configuration, display state, stats and store sizes
    Status,

    /// Export a stored stream
    Export {
        /// Stream to export (sensor or sleep)
        #[arg(long, default_value = "sensor")]
        stream: String,

        /// Export format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScreenArg {
    On,
    Off,
}

impl From<ScreenArg> for DisplayState {
    fn from(arg: ScreenArg) -> Self {
        match arg {
            ScreenArg::On => DisplayState::On,
            ScreenArg::Off => DisplayState::Off,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            cmd_start();
        }
        Commands::Screen { state } => {
            cmd_screen(state.into());
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Export {
            stream,
            format,
            output,
        } => {
            cmd_export(&stream, &format, output);
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "could not load configuration, using defaults");
            Config::default()
        }
    }
}

fn cmd_start() {
    println!("Wearable Telemetry Agent v{VERSION}");
    println!();

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let tz = match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    println!("  Timezone: {tz}");
    println!("  Aggregation period: {} min", config.aggregation_period_mins);
    println!(
        "  Sleep poll: every {} min (offset {})",
        config.sleep_poll_period_mins, config.sleep_poll_offset_mins
    );
    println!("  Stability threshold: {} polls", config.stability_threshold);
    println!("  Sensors: {:?}", config.sensors_path());
    println!("  Store: {:?}", config.store_path());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let stats = Arc::new(EngineStats::with_persistence(config.stats_path()));
    let display = FileDisplaySource::new(config.display_state_path(), config.display_poll);
    let initial_display = read_display_state(&config.display_state_path());

    let engine = Engine::new(
        config.engine(),
        FileSensorProvider::new(config.sensors_path()),
        Rc::new(FileStorage::new(config.store_path())),
        Box::new(LogChannel),
        initial_display,
    )
    .with_stats(stats.clone());

    let sources: Vec<Box<dyn EventSource>> = vec![Box::new(ClockSource::new(tz)), Box::new(display)];
    let mut service = match Service::init(engine, sources) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error starting service: {e}");
            std::process::exit(1);
        }
    };
    println!("Instance ID: {}", stats.instance_id());

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone(), service.sender());

    let handled = service.run(&running);
    info!(handled, "event loop finished");

    println!();
    println!("Stopping agent...");
    let lost = service.teardown();
    if lost > 0 {
        println!("{lost} queued record(s) were not written");
    }

    println!();
    println!("{}", stats.summary());
}

fn cmd_screen(state: DisplayState) {
    let config = load_config();
    let path = config.display_state_path();
    if let Err(e) = write_display_state(&path, state) {
        eprintln!("Error writing display state: {e}");
        std::process::exit(1);
    }
    println!("Display {state}.");
}

fn cmd_status() {
    let config = load_config();

    println!("Wearable Telemetry Agent Status");
    println!("===============================");
    println!();

    println!("Configuration:");
    println!("  Timezone: {}", config.timezone);
    println!("  Aggregation period: {} min", config.aggregation_period_mins);
    println!("  Stability threshold: {} polls", config.stability_threshold);
    println!(
        "  Notifications: {}",
        if config.notifications {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  Display: {}",
        read_display_state(&config.display_state_path())
    );
    println!();

    let storage: Rc<dyn Storage> = Rc::new(FileStorage::new(config.store_path()));
    println!("Stores:");
    println!(
        "  sensor: {} record(s)",
        Store::<AggregateRecord>::new(StreamId::Sensor, storage.clone())
            .load()
            .len()
    );
    println!(
        "  sleep: {} record(s)",
        Store::<SleepRecord>::new(StreamId::Sleep, storage).load().len()
    );
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = EngineStats::with_persistence(stats_path);
        let StatsSnapshot {
            samples_collected,
            aggregates_produced,
            sleep_commits,
            records_written,
            flush_failures,
            notifications_sent,
            ..
        } = stats.snapshot();
        println!("Cumulative Statistics:");
        println!("  Samples collected: {samples_collected}");
        println!("  Aggregate records: {aggregates_produced}");
        println!("  Sleep commits: {sleep_commits}");
        println!("  Records written: {records_written}");
        println!("  Flush failures: {flush_failures}");
        println!("  Notifications sent: {notifications_sent}");
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_export(stream: &str, format: &str, output: Option<PathBuf>) {
    let Some(stream) = StreamId::parse(stream) else {
        eprintln!("Error: unknown stream '{stream}' (expected sensor or sleep)");
        std::process::exit(1);
    };

    let config = load_config();
    let storage: Rc<dyn Storage> = Rc::new(FileStorage::new(config.store_path()));
    let jsonl = format == "jsonl";

    let result = match stream {
        StreamId::Sensor => render(
            &Store::<AggregateRecord>::new(stream, storage).load(),
            jsonl,
        ),
        StreamId::Sleep => render(&Store::<SleepRecord>::new(stream, storage).load(), jsonl),
    };

    let (count, text) = match result {
        Ok(rendered) => rendered,
        Err(e) => {
            eprintln!("Error serializing: {e}");
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => match std::fs::write(&path, text) {
            Ok(_) => println!("Exported {count} {stream} record(s) to {path:?}"),
            Err(e) => {
                error!(error = %e, "export failed");
                eprintln!("Error writing export: {e}");
                std::process::exit(1);
            }
        },
        None => println!("{text}"),
    }
}

/// Render records as pretty JSON or JSON lines.
fn render<R: serde::Serialize>(
    records: &[R],
    jsonl: bool,
) -> Result<(usize, String), serde_json::Error> {
    let text = if jsonl {
        records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?
            .join("\n")
    } else {
        serde_json::to_string_pretty(records)?
    };
    Ok((records.len(), text))
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Data path: {:?}", config.data_path);
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>, events: Sender<EngineEvent>) {
    let result = ctrlc::set_handler(move || {
        let _ = events.send(EngineEvent::Shutdown);
        running.store(false, Ordering::SeqCst);
    });
    if let Err(e) = result {
        warn!(error = %e, "could not install Ctrl+C handler");
    }
}
