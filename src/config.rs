//! Configuration loader for the `weatherhat-recorder` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::models::metric;
use crate::sensor::DriverKind;
use crate::store::PgSettings;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Longest default I/O timeout; shorter intervals get half the interval.
const MAX_DEFAULT_IO_TIMEOUT_MS: u64 = 10_000;

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Database name overriding the one in `db_url`.
    pub db_name: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    pub db_connect_retries: u32,
    pub db_connect_retry_delay: Duration,

    pub sample_interval: Duration,

    /// Upper bound for every sensor read and store call; always shorter than
    /// `sample_interval`.
    pub io_timeout: Duration,

    pub location: String,
    pub sensor_type: String,
    pub startup_delay: Duration,
    pub sensor_driver: DriverKind,
    pub samples_per_cycle: u32,
    pub tracked_metrics: Vec<String>,
    pub api_addr: Option<SocketAddr>,
    pub echo_measurements: bool,

    /// Write hourly trend snapshots and daily reports.
    pub summaries: bool,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
/// - `SENSOR_URL` – only when `SENSOR_DRIVER=http`
///
/// Optional:
/// - `DATABASE_NAME` – override the database named in the URL
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `DB_CONNECT_RETRIES` / `DB_CONNECT_RETRY_SECS` – initial connect (default: 5 / 5)
/// - `SAMPLE_INTERVAL_SECS` – sampling period (default: 60)
/// - `IO_TIMEOUT_MS` – sensor/store call bound (default: half the interval, max 10s)
/// - `LOCATION` – location tag (default: `backyard`)
/// - `SENSOR_TYPE` – sensor tag (default: `weatherhat`)
/// - `STARTUP_DELAY_SECS` – wait before first database contact (default: 0)
/// - `SENSOR_DRIVER` – `simulated` or `http` (default: `simulated`)
/// - `SAMPLES_PER_CYCLE` – raw reads averaged per cycle (default: 1)
/// - `TRACKED_METRICS` – comma separated metrics to keep records for
/// - `API_ADDR` – serve the status API on this address
/// - `ECHO_MEASUREMENTS` – print each measurement as JSON on stdout
/// - `ENABLE_SUMMARIES` – hourly trends and daily reports (default: on)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_name = env::var("DATABASE_NAME").ok().filter(|s| !s.trim().is_empty());
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let db_connect_retries = parse_env_u32!("DB_CONNECT_RETRIES", 5);
    let db_connect_retry_secs = parse_env_u32!("DB_CONNECT_RETRY_SECS", 5);
    let interval_secs = parse_env_u32!("SAMPLE_INTERVAL_SECS", 60);
    let startup_delay_secs = parse_env_u32!("STARTUP_DELAY_SECS", 0);
    let samples_per_cycle = parse_env_u32!("SAMPLES_PER_CYCLE", 1);

    let io_timeout_ms = env::var("IO_TIMEOUT_MS")
        .ok()
        .map(|v| v.trim().parse::<u64>())
        .transpose()
        .map_err(|e| anyhow!("Invalid IO_TIMEOUT_MS: {}", e))?;

    let sensor_driver = match env::var("SENSOR_DRIVER").as_deref() {
        Ok("http") => DriverKind::Http {
            url: require_env!("SENSOR_URL"),
        },
        Ok("simulated") | Err(_) => DriverKind::Simulated,
        Ok(other) => bail!("Invalid SENSOR_DRIVER: {other} (expected `simulated` or `http`)"),
    };

    let tracked_metrics = match env::var("TRACKED_METRICS") {
        Ok(list) => parse_metric_list(&list),
        Err(_) => metric::DEFAULT_TRACKED.iter().map(|m| m.to_string()).collect(),
    };

    let api_addr = env::var("API_ADDR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|v| v.trim().parse::<SocketAddr>())
        .transpose()
        .map_err(|e| anyhow!("Invalid API_ADDR: {}", e))?;

    let echo_measurements = matches!(
        env::var("ECHO_MEASUREMENTS").as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    );

    let summaries = !matches!(
        env::var("ENABLE_SUMMARIES").as_deref(),
        Ok("0") | Ok("false") | Ok("no")
    );

    let sample_interval = Duration::from_secs(u64::from(interval_secs));
    let io_timeout = resolve_io_timeout(sample_interval, io_timeout_ms)?;

    if samples_per_cycle == 0 {
        bail!("SAMPLES_PER_CYCLE must be at least 1");
    }

    Ok(Config {
        db_url,
        db_name,
        db_pool_max,
        db_connect_retries,
        db_connect_retry_delay: Duration::from_secs(u64::from(db_connect_retry_secs)),
        sample_interval,
        io_timeout,
        location: env::var("LOCATION").unwrap_or_else(|_| "backyard".to_string()),
        sensor_type: env::var("SENSOR_TYPE").unwrap_or_else(|_| "weatherhat".to_string()),
        startup_delay: Duration::from_secs(u64::from(startup_delay_secs)),
        sensor_driver,
        samples_per_cycle,
        tracked_metrics,
        api_addr,
        echo_measurements,
        summaries,
    })
}

/// Split a comma separated metric list, dropping blanks and duplicates.
pub fn parse_metric_list(list: &str) -> Vec<String> {
    // ---
    let mut metrics: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !metrics.iter().any(|m| m == name) {
            metrics.push(name.to_string());
        }
    }
    metrics
}

/// Pick the I/O timeout and check it fits inside one sampling interval.
pub fn resolve_io_timeout(interval: Duration, requested_ms: Option<u64>) -> Result<Duration> {
    // ---
    if interval.is_zero() {
        bail!("SAMPLE_INTERVAL_SECS must be greater than 0");
    }

    let timeout = match requested_ms {
        Some(ms) => Duration::from_millis(ms),
        None => (interval / 2).min(Duration::from_millis(MAX_DEFAULT_IO_TIMEOUT_MS)),
    };

    if timeout.is_zero() || timeout >= interval {
        bail!(
            "IO_TIMEOUT_MS ({} ms) must be positive and shorter than the sampling interval ({} s)",
            timeout.as_millis(),
            interval.as_secs()
        );
    }
    Ok(timeout)
}

impl Config {
    /// Settings for opening the PostgreSQL record store.
    pub fn pg_settings(&self) -> PgSettings {
        PgSettings {
            url: self.db_url.clone(),
            database: self.db_name.clone(),
            pool_max: self.db_pool_max,
            acquire_timeout: self.io_timeout,
            connect_retries: self.db_connect_retries,
            retry_delay: self.db_connect_retry_delay,
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let driver = match &self.sensor_driver {
            DriverKind::Simulated => "simulated".to_string(),
            DriverKind::Http { url } => format!("http ({url})"),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL       : {}", mask_db_url(&self.db_url));
        tracing::info!(
            "  DATABASE_NAME      : {}",
            self.db_name.as_deref().unwrap_or("(from URL)")
        );
        tracing::info!("  DB_POOL_MAX        : {}", self.db_pool_max);
        tracing::info!("  SAMPLE_INTERVAL    : {:?}", self.sample_interval);
        tracing::info!("  IO_TIMEOUT         : {:?}", self.io_timeout);
        tracing::info!("  LOCATION           : {}", self.location);
        tracing::info!("  SENSOR_TYPE        : {}", self.sensor_type);
        tracing::info!("  SENSOR_DRIVER      : {}", driver);
        tracing::info!("  SAMPLES_PER_CYCLE  : {}", self.samples_per_cycle);
        tracing::info!("  TRACKED_METRICS    : {}", self.tracked_metrics.join(","));
        tracing::info!("  STARTUP_DELAY      : {:?}", self.startup_delay);
        tracing::info!("  ENABLE_SUMMARIES   : {}", self.summaries);
        tracing::info!(
            "  API_ADDR           : {}",
            self.api_addr.map_or("(disabled)".to_string(), |a| a.to_string())
        );
    }
}

/// Mask the password in a database URL.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // `postgres://host` has its only colon in the scheme
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}
