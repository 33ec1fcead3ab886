//! CLI entry point for the transit feed engine.
//!
//! Provides subcommands for one-shot status and arrival queries, route
//! geometry export, single-payload inspection, and a long-running watch
//! mode that keeps the refresh loop going until Ctrl+C.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_feed_engine::{
    TransitEngine,
    cache::CycleOutcome,
    clock::{Clock, SystemClock},
    config::EngineConfig,
    fetch::{BasicClient, FeedClient, FeedFetcher, auth::ApiKey, fetch_bytes},
    infra::gtfs_static::GtfsDirectory,
    model::Direction,
    output::{append_record, print_json, print_pretty, write_json},
    parser::{decode, parse_feed},
    services::shape_source::{ShapeSource, StaticNetwork},
    stats::FeedStats,
};

#[derive(Parser)]
#[command(name = "transit_feed_engine")]
#[command(about = "Realtime transit status, arrivals and route geometry", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: EngineConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refresh cycle and print the status of every route
    Status,
    /// Run one refresh cycle and print upcoming arrivals at a station
    Arrivals {
        /// Parent station id, e.g. "127"
        #[arg(value_name = "STATION_ID")]
        station: String,
    },
    /// Compute offset route polylines from the static dataset
    Polylines {
        /// Write JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Decode a single GTFS-RT payload from a file or URL and print its stats
    Decode {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// CSV file to append the stats row to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Keep refreshing in the background until Ctrl+C
    Watch {
        /// CSV file to append one stats row per published snapshot
        #[arg(long)]
        history: Option<String>,
    },
}

#[derive(Serialize)]
struct ArrivalRow<'a> {
    route_id: &'a str,
    direction: Direction,
    stop_id: &'a str,
    trip_id: &'a str,
    arrival_time: DateTime<Utc>,
    minutes_away: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_feed_engine.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_feed_engine.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Commands::Status => {
            let engine = start_engine(&config).await?;
            first_cycle(&engine).await?;
            let status = engine.service_status()?;
            info!(
                routes = status.value.routes.len(),
                disrupted = status.value.disrupted_count(),
                "Service status ready"
            );
            print_json(&status)?;
        }
        Commands::Arrivals { station } => {
            let engine = start_engine(&config).await?;
            first_cycle(&engine).await?;
            let arrivals = engine.arrivals(&station)?;
            let now = SystemClock.now();
            let rows: Vec<ArrivalRow> = arrivals
                .value
                .iter()
                .map(|a| ArrivalRow {
                    route_id: &a.route_id,
                    direction: a.direction,
                    stop_id: &a.stop_id,
                    trip_id: &a.trip_id,
                    arrival_time: a.arrival_time,
                    minutes_away: a.minutes_away(now),
                })
                .collect();
            print_json(&rows)?;
        }
        Commands::Polylines { output } => {
            let engine = start_engine(&config).await?;
            let polylines = engine.route_polylines();
            info!(routes = polylines.len(), "Route polylines computed");
            match output {
                Some(path) => write_json(&path, polylines)?,
                None => print_json(polylines)?,
            }
        }
        Commands::Decode { source, output } => {
            let bytes = fetcher(&source, &config).await?;
            let stats = match parse_feed(&bytes) {
                Ok(feed) => match decode(&bytes) {
                    Ok(decoded) => FeedStats::from_feed(&feed).with_decoded(&decoded),
                    Err(e) => {
                        warn!(error = %e, "Feed decoded but failed validation");
                        FeedStats {
                            error_type: Some(e.kind().to_string()),
                            error_message: Some(e.to_string()),
                            ..FeedStats::from_feed(&feed)
                        }
                    }
                },
                Err(e) => {
                    error!(error = %e, "Feed parse failed");
                    FeedStats::from_error(e.kind(), &e.to_string())
                }
            };
            let stats = stats.with_feed_info(&source, &source);

            print_pretty(&stats);
            print_json(&stats)?;
            if let Some(path) = output {
                append_record(&path, &stats)?;
            }
        }
        Commands::Watch { history } => {
            watch(&config, history).await?;
        }
    }

    Ok(())
}

/// Loads the static dataset and builds the engine. Any static data problem
/// is fatal.
#[tracing::instrument(skip_all, fields(static_dir = %config.static_gtfs_dir.display()))]
async fn start_engine(config: &EngineConfig) -> Result<TransitEngine> {
    let network: StaticNetwork = GtfsDirectory::new(&config.static_gtfs_dir)
        .load()
        .await
        .with_context(|| {
            format!(
                "failed to load static GTFS data from {}",
                config.static_gtfs_dir.display()
            )
        })?;
    info!(
        routes = network.routes.len(),
        shapes = network.shapes.len(),
        stations = network.stations.len(),
        "Static network loaded"
    );

    let fetcher = feed_client(config)?;
    Ok(TransitEngine::new(config, fetcher, network, Arc::new(SystemClock)))
}

/// HTTP feed client, with the API key header when one is configured.
fn feed_client(config: &EngineConfig) -> Result<Arc<dyn FeedFetcher>> {
    let timeout = config.fetch_timeout();
    let http = BasicClient::with_timeout(timeout).context("failed to build HTTP client")?;

    let client = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => FeedClient::new(ApiKey::new(http, &config.api_key_header, key)?, timeout),
        None => FeedClient::new(http, timeout),
    };
    Ok(Arc::new(client))
}

async fn first_cycle(engine: &TransitEngine) -> Result<()> {
    match engine.refresh_once().await {
        CycleOutcome::Refreshed { cycle } => {
            info!(cycle, "Feeds refreshed");
            Ok(())
        }
        CycleOutcome::Failed { error, .. } => bail!("refresh failed: {error}"),
        CycleOutcome::Skipped => bail!("refresh already in progress"),
    }
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip_all, fields(source = %source))]
async fn fetcher(source: &str, config: &EngineConfig) -> Result<Vec<u8>> {
    let bytes = if source.starts_with("http") {
        let timeout = config.fetch_timeout();
        let client = BasicClient::with_timeout(timeout)?;
        match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let client = ApiKey::new(client, &config.api_key_header, key)?;
                fetch_bytes(&client, source, timeout).await?.to_vec()
            }
            None => fetch_bytes(&client, source, timeout).await?.to_vec(),
        }
    } else {
        std::fs::read(source).with_context(|| format!("failed to read {source}"))?
    };
    Ok(bytes)
}

/// Runs the background refresh loop, logging every published snapshot, until
/// Ctrl+C.
#[tracing::instrument(skip(config))]
async fn watch(config: &EngineConfig, history: Option<String>) -> Result<()> {
    let engine = start_engine(config).await?;
    let mut snapshots = engine.cache().subscribe();
    let handle = engine.spawn_refresh();

    info!(
        interval_secs = config.refresh_interval_secs,
        endpoints = config.endpoints().len(),
        "Watching feeds. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown requested");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                    continue;
                };

                let stats = FeedStats::from_snapshot(&snapshot);
                info!(
                    cycle = snapshot.cycle,
                    alerts = stats.alerts,
                    arrivals = stats.arrivals,
                    service_changes = stats.alerts_service_change,
                    delays = stats.alerts_delay,
                    "Snapshot published"
                );

                if let Some(path) = &history {
                    if let Err(e) = append_record(path, &stats) {
                        error!(error = %e, path = %path, "Failed to append history row");
                    }
                }
            }
        }
    }

    handle.shutdown().await;
    let status = engine.refresh_status();
    info!(
        cycles = status.cycles_attempted,
        consecutive_failures = status.consecutive_failures,
        "Refresh loop stopped"
    );
    Ok(())
}
