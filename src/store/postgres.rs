//! PostgreSQL-backed record store.
//!
//! Measurements keep their metric map as `JSONB`, so the log stays a
//! document per cycle. Extrema carry a `revision` column that serves as the
//! compare-and-swap token for conditional replacement. Trend snapshots and
//! daily reports are keyed rows written with `ON CONFLICT DO NOTHING`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::{RecordStore, SummaryStore};
use crate::error::StoreError;
use crate::models::{Direction, ExtremumRecord, Measurement};
use crate::summary::{DailyReport, DailyStats, HourlySummary, TrendSnapshot, TrendStats};

// ---

#[derive(Debug, sqlx::FromRow)]
struct MeasurementRow {
    // ---
    id: Uuid,
    observed_at: DateTime<Utc>,
    location: String,
    sensor_type: String,
    metrics: Json<BTreeMap<String, f64>>,
    wind_cardinal: Option<String>,
}

impl From<MeasurementRow> for Measurement {
    fn from(row: MeasurementRow) -> Self {
        Measurement {
            id: row.id,
            timestamp: row.observed_at,
            location: row.location,
            sensor_type: row.sensor_type,
            metrics: row.metrics.0,
            wind_cardinal: row.wind_cardinal,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExtremumRow {
    // ---
    metric: String,
    direction: String,
    value: f64,
    observed_at: DateTime<Utc>,
    location: String,
    revision: i64,
}

impl TryFrom<ExtremumRow> for ExtremumRecord {
    type Error = StoreError;

    fn try_from(row: ExtremumRow) -> Result<Self, Self::Error> {
        // ---
        let direction = Direction::from_str(&row.direction).map_err(StoreError::Serialization)?;
        Ok(ExtremumRecord {
            metric: row.metric,
            direction,
            value: row.value,
            timestamp: row.observed_at,
            location: row.location,
            revision: row.revision,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrendRow {
    // ---
    hour_start: DateTime<Utc>,
    location: String,
    observed_at: DateTime<Utc>,
    trends: Json<BTreeMap<String, BTreeMap<String, TrendStats>>>,
}

impl From<TrendRow> for TrendSnapshot {
    fn from(row: TrendRow) -> Self {
        TrendSnapshot {
            hour: row.hour_start,
            timestamp: row.observed_at,
            location: row.location,
            trends: row.trends.0,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    // ---
    report_date: NaiveDate,
    location: String,
    data_points: i64,
    summary: Json<BTreeMap<String, DailyStats>>,
    hourly: Json<BTreeMap<u32, HourlySummary>>,
}

impl TryFrom<ReportRow> for DailyReport {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        // ---
        let data_points = u32::try_from(row.data_points).map_err(|_| {
            StoreError::Serialization(format!("invalid data_points {}", row.data_points))
        })?;
        Ok(DailyReport {
            date: row.report_date,
            location: row.location,
            data_points,
            summary: row.summary.0,
            hourly: row.hourly.0,
        })
    }
}

/// Connection settings for [`PgRecordStore::connect`].
#[derive(Debug, Clone)]
pub struct PgSettings {
    pub url: String,
    pub database: Option<String>,
    pub pool_max: u32,
    pub acquire_timeout: Duration,
    pub connect_retries: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a connection pool, retrying while the database comes up.
    pub async fn connect(settings: &PgSettings) -> Result<Self, StoreError> {
        // ---
        let mut options = PgConnectOptions::from_str(&settings.url)
            .map_err(|e| StoreError::Connection(format!("invalid database URL: {e}")))?;
        if let Some(name) = &settings.database {
            options = options.database(name);
        }

        let attempts = settings.connect_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = PgPoolOptions::new()
                .max_connections(settings.pool_max)
                .acquire_timeout(settings.acquire_timeout)
                .connect_with(options.clone())
                .await;

            match result {
                Ok(pool) => {
                    info!(attempt, "Successfully connected to database");
                    return Ok(Self::new(pool));
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        "Database connection failed: {}. Retrying in {:?}",
                        e,
                        settings.retry_delay
                    );
                    tokio::time::sleep(settings.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    // ---
    async fn append_measurement(&self, measurement: &Measurement) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO measurements (
                id, observed_at, location, sensor_type, metrics, wind_cardinal
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(measurement.id)
        .bind(measurement.timestamp)
        .bind(&measurement.location)
        .bind(&measurement.sensor_type)
        .bind(Json(&measurement.metrics))
        .bind(&measurement.wind_cardinal)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_extremum(
        &self,
        metric: &str,
        direction: Direction,
    ) -> Result<Option<ExtremumRecord>, StoreError> {
        // ---
        let row = sqlx::query_as::<_, ExtremumRow>(
            r#"
            SELECT metric, direction, value, observed_at, location, revision
            FROM extrema
            WHERE metric = $1 AND direction = $2
            "#,
        )
        .bind(metric)
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExtremumRecord::try_from).transpose()
    }

    async fn replace_extremum(
        &self,
        metric: &str,
        direction: Direction,
        new_record: &ExtremumRecord,
        expected_previous: Option<&ExtremumRecord>,
    ) -> Result<(), StoreError> {
        // ---
        let result = match expected_previous {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO extrema (metric, direction, value, observed_at, location, revision)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (metric, direction) DO NOTHING
                    "#,
                )
                .bind(metric)
                .bind(direction.as_str())
                .bind(new_record.value)
                .bind(new_record.timestamp)
                .bind(&new_record.location)
                .bind(new_record.revision)
                .execute(&self.pool)
                .await?
            }
            Some(previous) => {
                sqlx::query(
                    r#"
                    UPDATE extrema
                    SET value = $3, observed_at = $4, location = $5, revision = $6
                    WHERE metric = $1 AND direction = $2 AND revision = $7
                    "#,
                )
                .bind(metric)
                .bind(direction.as_str())
                .bind(new_record.value)
                .bind(new_record.timestamp)
                .bind(&new_record.location)
                .bind(new_record.revision)
                .bind(previous.revision)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::ExtremumConflict {
                metric: metric.to_string(),
                direction,
            });
        }
        Ok(())
    }

    async fn latest_measurements(&self, limit: u32) -> Result<Vec<Measurement>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, MeasurementRow>(
            r#"
            SELECT id, observed_at, location, sensor_type, metrics, wind_cardinal
            FROM measurements
            ORDER BY observed_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Measurement::from).collect())
    }

    async fn list_extrema(&self) -> Result<Vec<ExtremumRecord>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, ExtremumRow>(
            r#"
            SELECT metric, direction, value, observed_at, location, revision
            FROM extrema
            ORDER BY metric, direction
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExtremumRecord::try_from).collect()
    }
}

#[async_trait]
impl SummaryStore for PgRecordStore {
    // ---
    async fn measurements_between(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, MeasurementRow>(
            r#"
            SELECT id, observed_at, location, sensor_type, metrics, wind_cardinal
            FROM measurements
            WHERE location = $1 AND observed_at >= $2 AND observed_at < $3
            ORDER BY observed_at
            "#,
        )
        .bind(location)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Measurement::from).collect())
    }

    async fn append_trends(&self, snapshot: &TrendSnapshot) -> Result<bool, StoreError> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO trends (hour_start, location, observed_at, trends)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (hour_start, location) DO NOTHING
            "#,
        )
        .bind(snapshot.hour)
        .bind(&snapshot.location)
        .bind(snapshot.timestamp)
        .bind(Json(&snapshot.trends))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest_trends(&self) -> Result<Option<TrendSnapshot>, StoreError> {
        // ---
        let row = sqlx::query_as::<_, TrendRow>(
            r#"
            SELECT hour_start, location, observed_at, trends
            FROM trends
            ORDER BY hour_start DESC, location DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TrendSnapshot::from))
    }

    async fn get_daily_report(
        &self,
        date: NaiveDate,
        location: &str,
    ) -> Result<Option<DailyReport>, StoreError> {
        // ---
        let row = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT report_date, location, data_points, summary, hourly
            FROM daily_reports
            WHERE report_date = $1 AND location = $2
            "#,
        )
        .bind(date)
        .bind(location)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DailyReport::try_from).transpose()
    }

    async fn insert_daily_report(&self, report: &DailyReport) -> Result<bool, StoreError> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO daily_reports (report_date, location, data_points, summary, hourly)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (report_date, location) DO NOTHING
            "#,
        )
        .bind(report.date)
        .bind(&report.location)
        .bind(i64::from(report.data_points))
        .bind(Json(&report.summary))
        .bind(Json(&report.hourly))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
