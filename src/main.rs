//! Application entry point for the `weatherhat-recorder` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the sensor handle (the only fatal runtime dependency)
//! - Establishing a PostgreSQL connection pool, after an optional delay
//! - Creating the database schema if it does not exist
//! - Optionally serving the read-only status API
//! - Running the sampling loop until SIGINT/SIGTERM
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `SAMPLE_INTERVAL_SECS` (optional) – sampling period (default: 60)
//! - `LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`weatherhat_recorder::config`] for the full list.
use std::{env, io::IsTerminal, sync::Arc};

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use weatherhat_recorder::{
    config, routes, schema, shutdown, LoopSettings, Normalizer, PgRecordStore, RecordStore,
    RecordUpdater, SamplingLoop, SensorHandle, Summarizer, SummarySettings, SummaryStore,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    // Opened once for the life of the process; rain accumulation lives here
    let driver = cfg
        .sensor_driver
        .build(cfg.io_timeout)
        .context("Failed to set up sensor driver")?;
    let sensor = tokio::time::timeout(cfg.io_timeout, SensorHandle::open(driver))
        .await
        .map_err(|_| anyhow!("Timed out after {:?} opening the sensor", cfg.io_timeout))?
        .context("Failed to open sensor")?;

    if !cfg.startup_delay.is_zero() {
        tracing::info!("Waiting {:?} for the database to start...", cfg.startup_delay);
        tokio::time::sleep(cfg.startup_delay).await;
    }

    tracing::info!("Attempting to connect to database");
    let pg = PgRecordStore::connect(&cfg.pg_settings())
        .await
        .context("Failed to connect to database")?;

    schema::create_schema(pg.pool()).await?;

    let pg = Arc::new(pg);
    let store: Arc<dyn RecordStore> = pg.clone();
    let summaries: Arc<dyn SummaryStore> = pg;

    if let Some(addr) = cfg.api_addr {
        let app = routes::router(store.clone(), summaries.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status API listening on {}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Status API stopped: {}", e);
            }
        });
    }

    let updater = RecordUpdater::new(store.clone(), cfg.tracked_metrics.clone(), cfg.io_timeout);
    let normalizer = Normalizer::new(cfg.location.clone(), cfg.sensor_type.clone());
    let settings = LoopSettings {
        interval: cfg.sample_interval,
        io_timeout: cfg.io_timeout,
        samples_per_cycle: cfg.samples_per_cycle,
        echo_measurements: cfg.echo_measurements,
    };

    let mut sampler = SamplingLoop::new(sensor, normalizer, store, updater, settings);
    if cfg.summaries {
        let summarizer = Summarizer::new(summaries, SummarySettings::new(cfg.io_timeout));
        sampler = sampler.with_summarizer(summarizer);
    }
    sampler.run(shutdown::shutdown_signal()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `LOG_LEVEL` env var
///
/// Logs go to stderr so stdout stays free for `ECHO_MEASUREMENTS` output.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
