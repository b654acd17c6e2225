//! Weather service: cached weather.com.cn lookups by region path.
//!
//! Single-binary Tokio application that:
//! 1. Loads or crawls the region index
//! 2. Polls the active alert feed
//! 3. Serves weather snapshots and multi-week outlooks from freshness-managed caches

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::{SourceAdapter, Transliterator};
use weather_cache::{HazardIndex, RegionIndex, WeatherService};
use weather_client::{PinyinTransliterator, WeatherComClient, REGION_DIRECTORY};

/// Cached weather lookups for Chinese cities
#[derive(Parser)]
#[command(name = "weather-service", about = "Cached weather.com.cn lookups")]
struct Cli {
    /// Config file (defaults to ./config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keep the alert poller running and log cache stats until Ctrl-C.
    Run,
    /// Resolve `province[,district[,city]]` to a location.
    Resolve { path: String },
    /// Weather snapshot for a region path, or a location code with --code.
    Weather {
        target: String,
        #[arg(long)]
        code: bool,
    },
    /// Multi-week outlook for a region path.
    Forecast { path: String },
    /// List provinces, a province's districts, or a district's cities.
    Cities { path: Option<String> },
    /// Print this process's cache counters.
    ///
    /// Counters are per process, so a one-shot invocation prints zeros; the
    /// `run` heartbeat logs the live counters of a long-running service.
    Stats,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to encode output: {}", e),
    }
}

fn exit_on_error<T>(result: common::Result<T>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("{} failed: {}", what, e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "weather_service=info,weather_cache=info,weather_client=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    // Load configuration.
    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Cache: capacity={}, forecast_capacity={}, refresh={}m, lightweight={}m",
        cfg.cache.capacity,
        cfg.cache.forecast_capacity,
        cfg.timing.refresh_interval_minutes,
        cfg.timing.lightweight_interval_minutes,
    );

    let client = exit_on_error(WeatherComClient::new(cfg.network.timeout()), "HTTP client setup");
    let adapter: Arc<dyn SourceAdapter> = Arc::new(client);
    let translit: Arc<dyn Transliterator> = Arc::new(PinyinTransliterator);

    let regions = exit_on_error(
        RegionIndex::load_or_build(
            Path::new(&cfg.storage.region_snapshot_path),
            adapter.clone(),
            translit.clone(),
            REGION_DIRECTORY,
            cfg.network.region_build_concurrency,
        )
        .await,
        "Region index",
    );
    info!(
        "Region index ready: {} provinces, {} locations",
        regions.province_count(),
        regions.location_count()
    );

    let heartbeat_period = Duration::from_secs(cfg.timing.heartbeat_secs);
    let service = WeatherService::new(
        cfg,
        Arc::new(regions),
        adapter.clone(),
        translit,
        Arc::new(HazardIndex::new()),
    );

    match cli.command {
        Command::Run => run(service, heartbeat_period).await,
        Command::Resolve { path } => print_json(&exit_on_error(service.resolve(&path), "Resolve")),
        Command::Weather { target, code } => {
            if let Err(e) = service.hazards().refresh(adapter.as_ref()).await {
                warn!("Alert list unavailable, snapshot carries no alerts: {}", e);
            }
            let snapshot = if code {
                service.weather_by_code(&target).await
            } else {
                service.weather(&target).await
            };
            print_json(&exit_on_error(snapshot, "Weather lookup"));
        }
        Command::Forecast { path } => {
            let days = service.forecast(&path).await;
            service.shutdown().await;
            print_json(&exit_on_error(days, "Forecast lookup"));
        }
        Command::Cities { path } => {
            let listing = service.list(path.as_deref().unwrap_or_default());
            print_json(&exit_on_error(listing, "City listing"));
        }
        Command::Stats => print_json(&service.stats().await),
    }
}

async fn run(service: WeatherService, heartbeat_period: Duration) {
    let cancel = CancellationToken::new();
    let hazard_handle = service.spawn_hazard_poller(cancel.clone());

    let hb_service = service.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let stats = hb_service.stats().await;
            let hazards = hb_service.hazards().len().await;
            info!(
                "💓 Heartbeat | items={} gets={} hits={} evictions={} bytes={} | alerts={}",
                stats.items, stats.gets, stats.hits, stats.evictions, stats.bytes, hazards
            );
        }
    });

    info!("✅ Weather service running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        r = hazard_handle => {
            error!("Hazard poller exited: {:?}", r);
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
        }
    }

    cancel.cancel();
    service.shutdown().await;
    info!("Weather service stopped");
}
