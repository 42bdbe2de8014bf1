// Copyright 2025 tracklog contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use tracklog::config::load_config_with_env;
use tracklog::export::ExportFormat;
use tracklog::index::{Database, TrackId};
use tracklog::sample::{parse_lenient, FieldValue};
use tracklog::track::Track;

/// tracklog - record sensor/GPS tracks and keep their metadata indexed
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Data directory (overrides config file for recorder and index)
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest newline-delimited JSON samples from stdin into a live track
    Record,
    /// Synchronize the metadata index with the files on disk
    Sync {
        /// Rebuild the index from scratch instead of folding in changes
        #[arg(long)]
        full: bool,
    },
    /// List indexed tracks
    List,
    /// Produce an export derivative for a track
    Export {
        /// Track position or filename
        id: String,
        /// Target format: json, csv or gpx
        format: String,
    },
    /// Remove a track from the index
    Remove {
        /// Track position or filename
        id: String,
        /// Also delete the backing file (disk deletion happens first)
        #[arg(long)]
        delete_from_disk: bool,
    },
}

/// One stdin line: an optional timestamp plus a flat map of scalar fields.
#[derive(Debug, Deserialize)]
struct IngestLine {
    timestamp: Option<String>,
    #[serde(flatten)]
    fields: BTreeMap<String, FieldValue>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(data_dir) = args.data_dir {
        config.recorder.output_dir = data_dir.clone();
        config.index.directory = data_dir;
    }

    // Initialize tracing with configured level
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tracklog");
    info!("Loaded configuration from: {:?}", args.config);

    match args.command {
        Command::Record => record(&config).await,
        Command::Sync { full } => {
            let db = Database::open(&config.index).await?;
            if full {
                db.full_sync().await?;
            } else {
                db.incremental_sync().await?;
            }
            Ok(())
        }
        Command::List => {
            let db = Database::open(&config.index).await?;
            db.incremental_sync().await?;
            list(&db).await;
            Ok(())
        }
        Command::Export { id, format } => {
            let db = Database::open(&config.index).await?;
            let format = ExportFormat::from_str(&format)?;
            let path = db.export_track(&parse_track_id(&id), format).await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Remove {
            id,
            delete_from_disk,
        } => {
            let db = Database::open(&config.index).await?;
            db.remove_track(&parse_track_id(&id), delete_from_disk)
                .await?;
            Ok(())
        }
    }
}

/// Feed stdin samples into a live track until EOF or Ctrl+C, then finalize
/// the run.
async fn record(config: &tracklog::TracklogConfig) -> Result<()> {
    let mut track = Track::new(&config.recorder)?;
    track.start_run();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => ingest_line(&mut track, &line).await,
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, finalizing run");
                break;
            }
        }
    }

    track.end_run().await;
    info!("Recorded {} samples", track.len());
    Ok(())
}

async fn ingest_line(track: &mut Track, line: &str) {
    let parsed: IngestLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("skipping malformed input line: {}", e);
            return;
        }
    };
    let timestamp = match parsed.timestamp {
        Some(raw) => match parse_lenient(&raw) {
            Some(ts) => ts,
            None => {
                warn!("skipping line with invalid timestamp '{}'", raw);
                return;
            }
        },
        None => Utc::now(),
    };
    // Schema violations propagate to the producer; here that means the
    // line is reported and dropped while ingestion continues.
    if let Err(e) = track.add(timestamp, parsed.fields).await {
        warn!("sample rejected: {}", e);
    }
}

async fn list(db: &Database) {
    let tracks = db.list_tracks().await;
    if tracks.is_empty() {
        println!("no tracks available");
        return;
    }

    println!(
        "{:<5} {:<34} {:<20} {:<10} {:<12} {:<12} {}",
        "Index", "Filename", "Date/Time", "Checkpoint", "Duration", "Data Points", "Remote Units"
    );
    for (i, record) in tracks.iter().enumerate() {
        println!(
            "{:<5} {:<34} {:<20} {:<10} {:<12} {:<12} {}",
            i,
            record.filename,
            record
                .track_datetime
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            record.checkpoint,
            format_duration(record.track_duration_secs),
            record
                .datapoint_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            db.display_units(record).join(", "),
        );
    }
}

fn parse_track_id(raw: &str) -> TrackId {
    match raw.parse::<usize>() {
        Ok(position) => TrackId::Position(position),
        Err(_) => TrackId::Filename(raw.to_string()),
    }
}

/// Render a duration in seconds as "Hh Mm Ss".
fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        None => "N/A".to_string(),
        Some(seconds) => {
            let total = seconds as i64;
            format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
        }
    }
}
