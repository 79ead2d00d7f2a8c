//! Record store: the measurement log plus one extremum per (metric, direction).
//!
//! `replace_extremum` is a compare-and-swap. It only applies when the stored
//! record still equals `expected_previous` (or is still absent when
//! `expected_previous` is `None`); otherwise it fails with
//! [`StoreError::ExtremumConflict`] and writes nothing. Several processes can
//! share one store safely under this rule.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::models::{Direction, ExtremumRecord, Measurement};
use crate::summary::{DailyReport, TrendSnapshot};

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::{PgRecordStore, PgSettings};

// ---

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one measurement to the log.
    async fn append_measurement(&self, measurement: &Measurement) -> Result<(), StoreError>;

    async fn get_extremum(
        &self,
        metric: &str,
        direction: Direction,
    ) -> Result<Option<ExtremumRecord>, StoreError>;

    /// Conditionally replace the extremum for (`metric`, `direction`).
    async fn replace_extremum(
        &self,
        metric: &str,
        direction: Direction,
        new_record: &ExtremumRecord,
        expected_previous: Option<&ExtremumRecord>,
    ) -> Result<(), StoreError>;

    /// Newest measurements first.
    async fn latest_measurements(&self, limit: u32) -> Result<Vec<Measurement>, StoreError>;

    /// Every current extremum, ordered by metric then direction.
    async fn list_extrema(&self) -> Result<Vec<ExtremumRecord>, StoreError>;
}

/// Hourly trend snapshots and daily reports, derived from the log.
///
/// Both are keyed so that the first writer wins and later writers of the
/// same key are told nothing was written.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Measurements at `location` in `[from, to)`, oldest first.
    async fn measurements_between(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError>;

    /// `false` if a snapshot for the same hour and location already exists.
    async fn append_trends(&self, snapshot: &TrendSnapshot) -> Result<bool, StoreError>;

    /// The snapshot with the latest hour, any location.
    async fn latest_trends(&self) -> Result<Option<TrendSnapshot>, StoreError>;

    async fn get_daily_report(
        &self,
        date: NaiveDate,
        location: &str,
    ) -> Result<Option<DailyReport>, StoreError>;

    /// `false` if a report for the same date and location already exists.
    async fn insert_daily_report(&self, report: &DailyReport) -> Result<bool, StoreError>;
}

/// Run a store call with an upper bound on its duration.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    // ---
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        // ---
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        };
        let result = bounded(Duration::from_secs(1), slow).await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        // ---
        let result = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        let value = tokio_test::assert_ok!(result);
        assert_eq!(value, 7);
    }
}
