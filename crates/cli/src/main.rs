mod config;
mod error;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use clap::{Parser, Subcommand};
use host::{PstoreReader, RebootTracker};
use storage::EventStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{CONFIG_FILE, Config};
use error::{Error, Result};

#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(about = "Records host reboots and kernel crash events", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: std::path::PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan pstore crash remains once
    Scan,
    /// Record the current boot as a reboot event
    RecordReboot,
    /// Print recorded events, latest first
    Events {
        /// Only events newer than this age (e.g. "24h", "30m")
        #[arg(short, long, default_value = "72h")]
        since: String,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Record reboots and scan pstore periodically until interrupted
    Watch {
        /// Interval between passes (e.g. "5m")
        #[arg(short, long, default_value = "5m")]
        interval: String,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Scan => cmd_scan(&config),
        Commands::RecordReboot => cmd_record_reboot(&config),
        Commands::Events { since, json } => cmd_events(&config, &since, json),
        Commands::Watch { interval } => cmd_watch(&config, &interval).await,
    }
}

fn cmd_scan(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let reader = PstoreReader::new(&store, &config.pstore_dir)?;
    let cancel = CancellationToken::new();

    reader.scan(&cancel)?;
    let events = reader.get(&cancel, DateTime::UNIX_EPOCH)?;
    println!(
        "Scanned {}: {} crash signature(s) on record.",
        config.pstore_dir.display(),
        events.len()
    );
    Ok(())
}

fn cmd_record_reboot(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let tracker = RebootTracker::new(&store)?;
    let cancel = CancellationToken::new();

    tracker.record(&cancel)?;
    match tracker.get(&cancel, DateTime::UNIX_EPOCH)?.first() {
        Some(latest) => println!("Last reboot: {}", latest.message),
        None => println!("No reboot within the retention window."),
    }
    Ok(())
}

fn cmd_events(config: &Config, since: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let tracker = RebootTracker::new(&store)?;
    let reader = PstoreReader::new(&store, &config.pstore_dir)?;
    let cancel = CancellationToken::new();

    let since = Utc::now() - to_delta(parse_duration(since)?);
    let mut events = tracker.get(&cancel, since)?;
    events.extend(reader.get(&cancel, since)?);
    events.sort_by(|a, b| b.time.cmp(&a.time));

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    println!("{:<20}  {:<16}  MESSAGE", "TIME", "NAME");
    println!("{}", "-".repeat(80));
    for event in &events {
        let time = Local
            .from_utc_datetime(&event.time.naive_utc())
            .format("%Y-%m-%d %H:%M:%S");
        println!("{:<20}  {:<16}  {}", time.to_string(), event.name, event.message);
    }
    Ok(())
}

async fn cmd_watch(config: &Config, interval: &str) -> Result<()> {
    let interval = parse_duration(interval)?;
    let store = open_store(config)?;
    let tracker = RebootTracker::new(&store)?;
    let reader = PstoreReader::new(&store, &config.pstore_dir)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    info!(interval = ?interval, "watch started");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = watch_pass(&tracker, &reader, config, &cancel) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(error = %e, "watch pass failed");
                }
            }
        }
    }
    info!("watch stopped");
    Ok(())
}

fn watch_pass(
    tracker: &RebootTracker,
    reader: &PstoreReader,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    tracker.record(cancel)?;
    if config.pstore_dir.is_dir() {
        reader.scan(cancel)?;
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        Ok(Config::default())
    }
}

fn open_store(config: &Config) -> Result<EventStore> {
    if let Some(parent) = config.database.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(EventStore::open(&config.database, config.retention()?)?)
}

fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| Error::Duration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}
