//! In-process record store.
//!
//! Same conditional-replace semantics as the PostgreSQL store. Used by the
//! test suite and for running the sampler without a database. An outage can
//! be simulated with [`MemoryRecordStore::set_offline`]. Also keeps trend
//! snapshots and daily reports.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::{RecordStore, SummaryStore};
use crate::error::StoreError;
use crate::models::{Direction, ExtremumRecord, Measurement};
use crate::summary::{DailyReport, TrendSnapshot};

// ---

#[derive(Debug, Default)]
struct Inner {
    measurements: Vec<Measurement>,
    extrema: BTreeMap<(String, Direction), ExtremumRecord>,
    trends: BTreeMap<(DateTime<Utc>, String), TrendSnapshot>,
    reports: BTreeMap<(NaiveDate, String), DailyReport>,
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreError::Connection`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn measurement_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.measurements.len())
            .unwrap_or_default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        // ---
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store is offline".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Connection("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    // ---
    async fn append_measurement(&self, measurement: &Measurement) -> Result<(), StoreError> {
        // ---
        let mut inner = self.inner()?;
        if inner.measurements.iter().any(|m| m.id == measurement.id) {
            return Err(StoreError::Constraint(format!(
                "measurement {} already exists",
                measurement.id
            )));
        }
        inner.measurements.push(measurement.clone());
        Ok(())
    }

    async fn get_extremum(
        &self,
        metric: &str,
        direction: Direction,
    ) -> Result<Option<ExtremumRecord>, StoreError> {
        // ---
        let inner = self.inner()?;
        Ok(inner.extrema.get(&(metric.to_string(), direction)).cloned())
    }

    async fn replace_extremum(
        &self,
        metric: &str,
        direction: Direction,
        new_record: &ExtremumRecord,
        expected_previous: Option<&ExtremumRecord>,
    ) -> Result<(), StoreError> {
        // ---
        let mut inner = self.inner()?;
        let key = (metric.to_string(), direction);

        if inner.extrema.get(&key) != expected_previous {
            return Err(StoreError::ExtremumConflict {
                metric: metric.to_string(),
                direction,
            });
        }

        inner.extrema.insert(key, new_record.clone());
        Ok(())
    }

    async fn latest_measurements(&self, limit: u32) -> Result<Vec<Measurement>, StoreError> {
        // ---
        let inner = self.inner()?;
        // Equal timestamps keep reverse insertion order
        let mut newest: Vec<Measurement> = inner.measurements.iter().rev().cloned().collect();
        newest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        newest.truncate(limit as usize);
        Ok(newest)
    }

    async fn list_extrema(&self) -> Result<Vec<ExtremumRecord>, StoreError> {
        let inner = self.inner()?;
        Ok(inner.extrema.values().cloned().collect())
    }
}

#[async_trait]
impl SummaryStore for MemoryRecordStore {
    // ---
    async fn measurements_between(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Measurement>, StoreError> {
        // ---
        let inner = self.inner()?;
        let mut found: Vec<Measurement> = inner
            .measurements
            .iter()
            .filter(|m| m.location == location && m.timestamp >= from && m.timestamp < to)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.timestamp);
        Ok(found)
    }

    async fn append_trends(&self, snapshot: &TrendSnapshot) -> Result<bool, StoreError> {
        // ---
        let mut inner = self.inner()?;
        let key = (snapshot.hour, snapshot.location.clone());
        if inner.trends.contains_key(&key) {
            return Ok(false);
        }
        inner.trends.insert(key, snapshot.clone());
        Ok(true)
    }

    async fn latest_trends(&self) -> Result<Option<TrendSnapshot>, StoreError> {
        let inner = self.inner()?;
        Ok(inner.trends.values().next_back().cloned())
    }

    async fn get_daily_report(
        &self,
        date: NaiveDate,
        location: &str,
    ) -> Result<Option<DailyReport>, StoreError> {
        let inner = self.inner()?;
        Ok(inner.reports.get(&(date, location.to_string())).cloned())
    }

    async fn insert_daily_report(&self, report: &DailyReport) -> Result<bool, StoreError> {
        // ---
        let mut inner = self.inner()?;
        let key = (report.date, report.location.clone());
        if inner.reports.contains_key(&key) {
            return Ok(false);
        }
        inner.reports.insert(key, report.clone());
        Ok(true)
    }
}
