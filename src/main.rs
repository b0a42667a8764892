//! Aircraft registry CLI
//!
//! Replays a file of decoded BaseStation (SBS-1) messages through the
//! registry and logs periodic summaries of the accumulated state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skystate::{
    enrichment::{
        AircraftDatabase, AircraftTypeInfo, CodeBlock, DatabaseAircraft, LookupError, Route,
        StandingData,
    },
    registry::RegistryBuilder,
    types::{FeedEvent, MessageKind, SurveillanceMessage},
};

#[derive(Parser)]
#[command(name = "skystate")]
#[command(about = "In-memory aircraft state registry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SKYSTATE_LOG", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a BaseStation (SBS-1) message file through the registry
    Replay {
        /// Path to the SBS message file
        file: PathBuf,

        /// Pause between messages, in milliseconds (0 = as fast as possible)
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// How often to log a registry summary, in seconds
        #[arg(long, default_value = "10")]
        summary_interval: u64,
    },

    /// Parse a single SBS line and print the decoded message
    Parse {
        /// The raw SBS line, e.g. "MSG,3,1,1,4008F6,..."
        line: String,
    },
}

/// Stand-in reference database until a real one is wired up.
struct NullDatabase;

impl AircraftDatabase for NullDatabase {
    fn lookup_by_address(&self, _hex: &str) -> Result<Option<DatabaseAircraft>, LookupError> {
        Ok(None)
    }

    fn count_flights(&self, _registration: &str) -> Result<i64, LookupError> {
        Ok(0)
    }
}

struct NullStandingData;

impl StandingData for NullStandingData {
    fn find_route(&self, _callsign: &str) -> Result<Option<Route>, LookupError> {
        Ok(None)
    }

    fn find_code_block(&self, _hex: &str) -> Result<Option<CodeBlock>, LookupError> {
        Ok(None)
    }

    fn find_aircraft_type(&self, _type_code: &str) -> Result<Option<AircraftTypeInfo>, LookupError> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Replay {
            file,
            delay_ms,
            summary_interval,
        } => replay(file, delay_ms, summary_interval).await,
        Commands::Parse { line } => {
            match parse_sbs_line(&line) {
                Some(msg) => println!("{:#?}", msg),
                None => println!("not a decodable SBS transmission"),
            }
            Ok(())
        }
    }
}

async fn replay(
    file: PathBuf,
    delay_ms: u64,
    summary_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (feed, source) = mpsc::unbounded_channel();
    let registry = RegistryBuilder::new()
        .database(Arc::new(NullDatabase))
        .standing_data(Arc::new(NullStandingData))
        .source(source)
        .build();
    registry.start()?;

    tracing::info!(file = %file.display(), "replaying messages");

    let reader = tokio::fs::File::open(&file).await?;
    let feeder = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut sent = 0u64;
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(msg) = parse_sbs_line(&line) {
                if feed.send(FeedEvent::Message(msg)).is_err() {
                    break;
                }
                sent += 1;
            }
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
        tracing::info!(sent, "replay file exhausted");
        // feed drops here, which ends the registry's run loop.
    });

    let heartbeat = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                registry.heartbeat();
            }
        })
    };

    let summary = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(summary_interval.max(1)));
            loop {
                ticker.tick().await;
                let snapshot = registry.snapshot();
                let stats = registry.stats().snapshot();
                tracing::info!(
                    visible = snapshot.aircraft.len(),
                    tracked = registry.len(),
                    latest_version = snapshot.latest_version,
                    messages = stats.messages_received,
                    rejected = stats.messages_rejected,
                    "registry summary"
                );
            }
        })
    };

    tokio::select! {
        result = registry.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    feeder.abort();
    heartbeat.abort();
    summary.abort();
    registry.settle().await;

    let snapshot = registry.snapshot();
    let stats = registry.stats().snapshot();
    tracing::info!(
        tracked = registry.len(),
        visible = snapshot.aircraft.len(),
        messages = stats.messages_received,
        rejected = stats.messages_rejected,
        records = stats.records_created,
        "replay finished"
    );

    registry.stop().await;
    Ok(())
}

/// Decode one BaseStation (SBS-1) CSV line into a surveillance message.
/// Only "MSG" rows decode; the transmission type in field 1 selects the
/// message kind. Returns `None` for other row types and malformed lines.
fn parse_sbs_line(line: &str) -> Option<SurveillanceMessage> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < 11 || fields[0] != "MSG" {
        return None;
    }

    let kind = match fields[1] {
        "1" => MessageKind::Identification,
        "2" => MessageKind::SurfacePosition,
        "3" => MessageKind::AirbornePosition,
        "4" => MessageKind::AirborneVelocity,
        "5" => MessageKind::SurveillanceAltitude,
        "6" => MessageKind::SurveillanceId,
        "7" => MessageKind::AirToAir,
        "8" => MessageKind::AllCallReply,
        _ => return None,
    };

    let field = |i: usize| fields.get(i).map(|f| f.trim()).filter(|f| !f.is_empty());

    let mut msg = SurveillanceMessage::new(field(4)?, kind);
    msg.callsign = field(10).map(String::from);
    msg.altitude = field(11).and_then(|f| f.parse().ok());
    msg.ground_speed = field(12).and_then(|f| f.parse().ok());
    msg.track = field(13).and_then(|f| f.parse().ok());
    msg.latitude = field(14).and_then(|f| f.parse().ok());
    msg.longitude = field(15).and_then(|f| f.parse().ok());
    msg.vertical_rate = field(16).and_then(|f| f.parse().ok());
    msg.squawk = field(17).and_then(|f| f.parse().ok());
    // SBS encodes booleans as -1 (true) / 0 (false).
    msg.on_ground = field(21).map(|f| f == "-1" || f == "1");
    Some(msg)
}
