// src/main.rs
//! GPS Tracker - follow a GPS-over-network device and keep its odometer

use anyhow::Context;
use clap::Parser;
use gps_tracker::{
    config::TrackerConfig,
    link::{LinkEvent, LinkSink, TelemetryLink, TracingLinkSink},
    logging,
    store::{Progress, TrackingStore},
    ConnectionState, EntityId, PositionFix,
};
use std::{path::PathBuf, time::Duration};
use tokio::sync::mpsc;
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "gps-tracker", version, about = "Track a GPS-over-network device and its distance travelled")]
struct Cli {
    /// Device host name or IP address
    #[arg(long)]
    host: Option<String>,

    /// Device TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Identifier the fixes are recorded under
    #[arg(short, long)]
    entity: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Give up when the device sends nothing for this many seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Config file (defaults to ~/.config/gps-tracker/config.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    /// Print the first valid fix and exit
    #[arg(long)]
    probe: bool,

    /// How long --probe waits for a valid fix, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    probe_deadline: u64,

    /// Reconnect with exponential backoff after the link fails
    #[arg(long)]
    reconnect: bool,

    /// Debug logging for this crate (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut TrackerConfig) {
        if let Some(ref host) = self.host {
            config.device_host = host.clone();
        }
        if let Some(port) = self.port {
            config.device_port = port;
        }
        if let Some(ref entity) = self.entity {
            config.entity_id = entity.clone();
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = secs;
        }
    }
}

/// Reconnect delay that doubles on every failure up to a ceiling.
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self { current: INITIAL_BACKOFF }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

enum Outcome {
    Interrupted,
    Ended(Option<LinkEvent>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(ref path) => path.clone(),
        None => TrackerConfig::get_config_path()?,
    };
    let mut config = TrackerConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cli.apply_to(&mut config);

    if cli.save_config {
        config.save_to(&config_path)?;
        info!(path = %config_path.display(), "Configuration saved");
    }

    let link = TelemetryLink::new(config.link_config()?);
    println!("Connecting to GPS device at {}:{}...", config.device_host, config.device_port);

    if cli.probe {
        let fix = TelemetryLink::probe(link.config().clone(), Duration::from_secs(cli.probe_deadline)).await?;
        print_fix(&fix, None);
        return Ok(());
    }

    track(link, config.entity(), cli.reconnect).await
}

async fn track(link: TelemetryLink, entity: EntityId, reconnect: bool) -> anyhow::Result<()> {
    let store = TrackingStore::new();
    let mut backoff = Backoff::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let failure = loop {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = link.start(tx);

        let outcome = loop {
            tokio::select! {
                _ = &mut ctrl_c => break Outcome::Interrupted,
                event = rx.recv() => {
                    let Some(event) = event else { break Outcome::Ended(None) };
                    TracingLinkSink.emit(event.clone());

                    match event {
                        LinkEvent::Connected => backoff.reset(),
                        LinkEvent::FixReceived(fix) => match store.record(&entity, fix).await {
                            Ok(progress) => print_fix(&progress.fix, Some(&progress)),
                            Err(e) => warn!(error = %e, "Fix not applied"),
                        },
                        event if event.is_terminal() => break Outcome::Ended(Some(event)),
                        _ => {}
                    }
                }
            }
        };

        let state = handle.shutdown().await?;

        match outcome {
            Outcome::Interrupted => {
                println!("\nStopping...");
                break None;
            }
            Outcome::Ended(event) if !reconnect || state != ConnectionState::Failed => break event,
            Outcome::Ended(_) => {
                let delay = backoff.next_delay();
                info!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
                tokio::select! {
                    _ = &mut ctrl_c => break None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    if let Some(state) = store.state(&entity).await {
        println!("Total distance for {}: {:.3} km", entity, state.cumulative_distance_km);
    }

    match failure {
        Some(event) => anyhow::bail!("GPS link ended: {}", event),
        None => Ok(()),
    }
}

fn print_fix(fix: &PositionFix, progress: Option<&Progress>) {
    let mut line = format!(
        "{}  {} {}  {:>7.1} km/h",
        fix.timestamp().format("%Y-%m-%d %H:%M:%S"),
        PositionFix::format_coordinate(fix.latitude),
        PositionFix::format_coordinate(fix.longitude),
        fix.speed_kmh,
    );

    if let Some(progress) = progress {
        line.push_str(&format!("  +{:.3} km  total {:.3} km", progress.delta_km, progress.total_km));
    }

    println!("{}", line);
}
