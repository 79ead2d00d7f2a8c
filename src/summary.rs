//! Hourly trend snapshots and daily reports.
//!
//! Both are derived from the measurement log after a measurement has been
//! stored, and both are keyed so that several instances computing the same
//! hour or day write it once. A failure here is logged by the caller and
//! never fails the sampling cycle. Hours and days are UTC.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::error::StoreError;
use crate::models::{metric, Measurement};
use crate::store::{bounded, SummaryStore};

// ---

/// Look-back windows of a trend snapshot, in hours.
pub const TREND_WINDOWS_HOURS: [i64; 5] = [1, 3, 6, 12, 24];

/// Trends are taken by the first cycle this close to the top of the hour.
pub const TREND_MINUTES: u32 = 5;

/// Yesterday's report is written from this hour of the day onwards.
pub const REPORT_FROM_HOUR: u32 = 1;

pub const DEFAULT_TREND_METRICS: [&str; 4] = [
    metric::TEMPERATURE,
    metric::PRESSURE,
    metric::HUMIDITY,
    metric::WIND_SPEED,
];

pub const DEFAULT_REPORT_METRICS: [&str; 6] = [
    metric::TEMPERATURE,
    metric::HUMIDITY,
    metric::PRESSURE,
    metric::WIND_SPEED,
    metric::RAIN_RATE,
    metric::LIGHT,
];

/// How one metric moved over one look-back window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub count: u32,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// Current value minus the oldest value in the window.
    pub change: f64,
    /// `change` relative to the oldest value; 0 when that value is 0.
    pub change_pct: f64,
    pub rate_per_hour: f64,
}

impl TrendStats {
    /// `values` must be oldest first. `None` for an empty window.
    fn over_window(current: f64, values: &[f64], hours: i64) -> Option<Self> {
        // ---
        let first = *values.first()?;
        let change = current - first;
        let change_pct = if first != 0.0 {
            change / first * 100.0
        } else {
            0.0
        };

        Some(Self {
            count: values.len() as u32,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg: mean(values),
            change,
            change_pct,
            rate_per_hour: change / hours as f64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    /// Start of the clock hour the snapshot belongs to.
    pub hour: DateTime<Utc>,
    /// Timestamp of the measurement the snapshot was taken at.
    pub timestamp: DateTime<Utc>,
    pub location: String,
    /// Metric name, then window label (`hour_1`, `hour_3`, ...).
    pub trends: BTreeMap<String, BTreeMap<String, TrendStats>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySummary {
    pub data_points: u32,
    pub metrics: BTreeMap<String, HourStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub location: String,
    pub data_points: u32,
    pub summary: BTreeMap<String, DailyStats>,
    /// Hour of day (0-23) to that hour's figures; every hour is present.
    pub hourly: BTreeMap<u32, HourlySummary>,
}

pub fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    // ---
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Trend snapshot for `current`, computed from the measurements before it.
///
/// Only history strictly older than `current` and inside each window
/// counts. Metrics `current` lacks are left out; windows without history
/// are left out of their metric.
pub fn compute_trends(
    current: &Measurement,
    history: &[Measurement],
    metrics: &[String],
) -> TrendSnapshot {
    // ---
    let mut older: Vec<&Measurement> = history
        .iter()
        .filter(|m| m.location == current.location && m.timestamp < current.timestamp)
        .collect();
    older.sort_by_key(|m| m.timestamp);

    let mut trends = BTreeMap::new();
    for name in metrics {
        let Some(current_value) = current.metric(name) else {
            continue;
        };

        let mut windows = BTreeMap::new();
        for hours in TREND_WINDOWS_HOURS {
            let start = current.timestamp - TimeDelta::hours(hours);
            let values: Vec<f64> = older
                .iter()
                .filter(|m| m.timestamp >= start)
                .filter_map(|m| m.metric(name))
                .collect();
            if let Some(stats) = TrendStats::over_window(current_value, &values, hours) {
                windows.insert(format!("hour_{hours}"), stats);
            }
        }
        trends.insert(name.clone(), windows);
    }

    TrendSnapshot {
        hour: hour_start(current.timestamp),
        timestamp: current.timestamp,
        location: current.location.clone(),
        trends,
    }
}

/// Report for `date` at `location`, or `None` if nothing was measured.
pub fn compute_daily_report(
    date: NaiveDate,
    location: &str,
    measurements: &[Measurement],
    metrics: &[String],
) -> Option<DailyReport> {
    // ---
    let day: Vec<&Measurement> = measurements
        .iter()
        .filter(|m| m.location == location && m.timestamp.date_naive() == date)
        .collect();
    if day.is_empty() {
        return None;
    }

    let values_of = |entries: &[&Measurement], name: &str| -> Vec<f64> {
        entries.iter().filter_map(|m| m.metric(name)).collect()
    };

    let mut summary = BTreeMap::new();
    for name in metrics {
        let values = values_of(&day, name);
        if values.is_empty() {
            continue;
        }
        summary.insert(
            name.clone(),
            DailyStats {
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                avg: mean(&values),
                median: median(&values),
            },
        );
    }

    let mut hourly = BTreeMap::new();
    for hour in 0..24 {
        let entries: Vec<&Measurement> = day
            .iter()
            .copied()
            .filter(|m| m.timestamp.hour() == hour)
            .collect();

        let mut figures = HourlySummary {
            data_points: entries.len() as u32,
            metrics: BTreeMap::new(),
        };
        for name in metrics {
            let values = values_of(&entries, name);
            if values.is_empty() {
                continue;
            }
            figures.metrics.insert(
                name.clone(),
                HourStats {
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    avg: mean(&values),
                },
            );
        }
        hourly.insert(hour, figures);
    }

    Some(DailyReport {
        date,
        location: location.to_string(),
        data_points: day.len() as u32,
        summary,
        hourly,
    })
}

#[derive(Debug, Clone)]
pub struct SummarySettings {
    pub trend_metrics: Vec<String>,
    pub report_metrics: Vec<String>,
    /// Bound on each store call.
    pub io_timeout: Duration,
}

impl SummarySettings {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            trend_metrics: DEFAULT_TREND_METRICS.iter().map(|m| m.to_string()).collect(),
            report_metrics: DEFAULT_REPORT_METRICS.iter().map(|m| m.to_string()).collect(),
            io_timeout,
        }
    }
}

/// What one call to [`Summarizer::after_measurement`] wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryReport {
    pub trends_written: bool,
    pub report_written: Option<NaiveDate>,
}

/// Decides when trends and reports are due and writes them.
pub struct Summarizer {
    store: Arc<dyn SummaryStore>,
    settings: SummarySettings,
    last_trend_hour: Option<DateTime<Utc>>,
    last_report_check: Option<DateTime<Utc>>,
}

impl Summarizer {
    pub fn new(store: Arc<dyn SummaryStore>, settings: SummarySettings) -> Self {
        Self {
            store,
            settings,
            last_trend_hour: None,
            last_report_check: None,
        }
    }

    /// Run whatever is due now that `measurement` is in the log.
    ///
    /// Trends: once per hour, by the first measurement within
    /// [`TREND_MINUTES`] of the top of the hour. Daily report: checked once
    /// per hour, written for yesterday if it does not exist yet. A failed
    /// step is retried by the next measurement.
    pub async fn after_measurement(
        &mut self,
        measurement: &Measurement,
        deadline: Instant,
    ) -> Result<SummaryReport, StoreError> {
        // ---
        let mut report = SummaryReport::default();
        let hour = hour_start(measurement.timestamp);

        let trends_due = measurement.timestamp.minute() < TREND_MINUTES
            && self.last_trend_hour != Some(hour);
        if trends_due {
            report.trends_written = self.write_trends(measurement, deadline).await?;
            self.last_trend_hour = Some(hour);
        }

        if self.last_report_check != Some(hour) {
            report.report_written = self.write_daily_report(measurement, deadline).await?;
            self.last_report_check = Some(hour);
        }

        Ok(report)
    }

    async fn write_trends(
        &self,
        measurement: &Measurement,
        deadline: Instant,
    ) -> Result<bool, StoreError> {
        // ---
        let since = measurement.timestamp - TimeDelta::hours(24);
        let history = self
            .call(
                deadline,
                self.store
                    .measurements_between(&measurement.location, since, measurement.timestamp),
            )
            .await?;

        let snapshot = compute_trends(measurement, &history, &self.settings.trend_metrics);
        let written = self.call(deadline, self.store.append_trends(&snapshot)).await?;
        if written {
            info!(
                hour = %snapshot.hour,
                history = history.len(),
                "Stored trend data"
            );
        }
        Ok(written)
    }

    async fn write_daily_report(
        &self,
        measurement: &Measurement,
        deadline: Instant,
    ) -> Result<Option<NaiveDate>, StoreError> {
        // ---
        if measurement.timestamp.hour() < REPORT_FROM_HOUR {
            return Ok(None);
        }
        let today = measurement.timestamp.date_naive();
        let Some(yesterday) = today.pred_opt() else {
            return Ok(None);
        };
        let location = measurement.location.as_str();

        let existing = self
            .call(deadline, self.store.get_daily_report(yesterday, location))
            .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let day = self
            .call(
                deadline,
                self.store
                    .measurements_between(location, day_start(yesterday), day_start(today)),
            )
            .await?;
        let Some(daily) =
            compute_daily_report(yesterday, location, &day, &self.settings.report_metrics)
        else {
            info!(date = %yesterday, "No data available for daily report");
            return Ok(None);
        };

        if self.call(deadline, self.store.insert_daily_report(&daily)).await? {
            info!(date = %yesterday, data_points = daily.data_points, "Generated daily report");
            Ok(Some(yesterday))
        } else {
            Ok(None)
        }
    }

    async fn call<T, F>(&self, deadline: Instant, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        // ---
        let budget = self
            .settings
            .io_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        bounded(budget, call).await
    }
}
