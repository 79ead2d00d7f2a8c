//! Database schema management for `weatherhat-recorder`.
//!
//! Ensures the measurement log, the extremum table and the summary tables
//! exist before the sampling loop starts. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the append-only `measurements` log and the `extrema` table keyed by
/// `(metric, direction)`, plus `trends` (one snapshot per hour and location)
/// and `daily_reports` (one per date and location). Safe to call on every startup, and from several
/// instances at once; every statement is a no-op if the object exists.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // One document per sampling cycle
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id            UUID        PRIMARY KEY,
            observed_at   TIMESTAMPTZ NOT NULL,
            location      TEXT        NOT NULL,
            sensor_type   TEXT        NOT NULL,
            metrics       JSONB       NOT NULL,
            wind_cardinal TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Current all-time extreme per (metric, direction)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extrema (
            metric      TEXT             NOT NULL,
            direction   TEXT             NOT NULL CHECK (direction IN ('highest', 'lowest')),
            value       DOUBLE PRECISION NOT NULL,
            observed_at TIMESTAMPTZ      NOT NULL,
            location    TEXT             NOT NULL,
            revision    BIGINT           NOT NULL,
            PRIMARY KEY (metric, direction)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_observed_at
            ON measurements (observed_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_location
            ON measurements (location, observed_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Hourly trend snapshot, first writer wins
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trends (
            hour_start  TIMESTAMPTZ NOT NULL,
            location    TEXT        NOT NULL,
            observed_at TIMESTAMPTZ NOT NULL,
            trends      JSONB       NOT NULL,
            PRIMARY KEY (hour_start, location)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_reports (
            report_date DATE        NOT NULL,
            location    TEXT        NOT NULL,
            data_points BIGINT      NOT NULL,
            summary     JSONB       NOT NULL,
            hourly      JSONB       NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (report_date, location)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
