//! All-time record tracking.
//!
//! For every tracked metric in a measurement, the updater checks the current
//! highest and lowest records and replaces the ones the new value strictly
//! beats. Replacement goes through the store's compare-and-swap; a conflict
//! is retried once with a fresh read and then given up for this cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CycleError, NormalizeError, StoreError};
use crate::models::{Direction, ExtremumRecord, Measurement};
use crate::store::{bounded, RecordStore};

// ---

/// Re-fetch and re-evaluate this many times after a conflicting replace.
pub const CONFLICT_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First value ever seen for this (metric, direction).
    Created,
    Replaced,
    /// The value did not strictly beat the stored extreme.
    Unchanged,
    /// Lost the compare-and-swap on every attempt; left for the next cycle.
    Conflicted,
    /// The cycle deadline passed before this record was settled.
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub metric: String,
    pub direction: Direction,
    pub value: f64,
    pub outcome: UpdateOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub changes: Vec<RecordChange>,
}

impl UpdateReport {
    /// Records created or replaced.
    pub fn written(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c.outcome, UpdateOutcome::Created | UpdateOutcome::Replaced))
            .count()
    }

    pub fn conflicts(&self) -> usize {
        self.count(UpdateOutcome::Conflicted)
    }

    pub fn deferred(&self) -> usize {
        self.count(UpdateOutcome::Deferred)
    }

    fn count(&self, outcome: UpdateOutcome) -> usize {
        self.changes.iter().filter(|c| c.outcome == outcome).count()
    }
}

pub struct RecordUpdater {
    store: Arc<dyn RecordStore>,
    tracked: Vec<String>,
    io_timeout: Duration,
}

impl RecordUpdater {
    pub fn new(store: Arc<dyn RecordStore>, tracked: Vec<String>, io_timeout: Duration) -> Self {
        Self {
            store,
            tracked,
            io_timeout,
        }
    }

    /// Bring the extremum records up to date with `measurement`.
    ///
    /// Tracked metrics missing from the measurement are skipped. A store
    /// failure other than a conflict stops the update and is returned;
    /// records already written by this call stay written.
    pub async fn apply(&self, measurement: &Measurement) -> Result<UpdateReport, CycleError> {
        self.apply_until(measurement, None).await
    }

    /// Like [`RecordUpdater::apply`], but gives up once `deadline` passes.
    /// Records not settled by then are reported as `Deferred` and picked up
    /// by a later measurement.
    pub async fn apply_until(
        &self,
        measurement: &Measurement,
        deadline: Option<Instant>,
    ) -> Result<UpdateReport, CycleError> {
        // ---
        let mut report = UpdateReport::default();

        for metric in &self.tracked {
            let Some(value) = measurement.metric(metric) else {
                debug!(metric = %metric, "Metric absent from measurement, skipping");
                continue;
            };
            if !value.is_finite() {
                return Err(NormalizeError::not_finite(metric, value).into());
            }

            for direction in Direction::ALL {
                let outcome = self
                    .update_one(metric, direction, value, measurement, deadline)
                    .await?;
                report.changes.push(RecordChange {
                    metric: metric.clone(),
                    direction,
                    value,
                    outcome,
                });
            }
        }

        if report.deferred() > 0 {
            warn!(
                deferred = report.deferred(),
                timestamp = %measurement.timestamp,
                "Cycle deadline reached, remaining record updates skipped"
            );
        }
        Ok(report)
    }

    /// Run one store call under the per-call bound and the cycle deadline.
    /// `Ok(None)` means the deadline ran out first.
    async fn within<T, F>(
        &self,
        deadline: Option<Instant>,
        call: F,
    ) -> Result<Option<T>, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        // ---
        let Some(deadline) = deadline else {
            return bounded(self.io_timeout, call).await.map(Some);
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        if remaining < self.io_timeout {
            return match tokio::time::timeout(remaining, call).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            };
        }
        bounded(self.io_timeout, call).await.map(Some)
    }

    async fn update_one(
        &self,
        metric: &str,
        direction: Direction,
        value: f64,
        measurement: &Measurement,
        deadline: Option<Instant>,
    ) -> Result<UpdateOutcome, StoreError> {
        // ---
        let mut attempt = 0;
        loop {
            let fetch = self.store.get_extremum(metric, direction);
            let Some(current) = self.within(deadline, fetch).await? else {
                return Ok(UpdateOutcome::Deferred);
            };

            if let Some(existing) = &current {
                if !direction.improves(value, existing.value) {
                    return Ok(UpdateOutcome::Unchanged);
                }
            }

            let candidate =
                ExtremumRecord::successor(metric, direction, value, measurement, current.as_ref());
            let replace = self
                .store
                .replace_extremum(metric, direction, &candidate, current.as_ref());

            match self.within(deadline, replace).await {
                Ok(None) => return Ok(UpdateOutcome::Deferred),
                Ok(Some(())) => {
                    info!(
                        metric,
                        %direction,
                        value,
                        previous = ?current.as_ref().map(|r| r.value),
                        timestamp = %measurement.timestamp,
                        "New {} record for {}: {}",
                        direction,
                        metric,
                        value
                    );
                    return Ok(match current {
                        None => UpdateOutcome::Created,
                        Some(_) => UpdateOutcome::Replaced,
                    });
                }
                Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(
                        metric,
                        %direction,
                        attempt,
                        "Extremum changed underneath us, re-fetching"
                    );
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        metric,
                        %direction,
                        value,
                        timestamp = %measurement.timestamp,
                        "Extremum still conflicting after {} retries, skipping this cycle",
                        CONFLICT_RETRIES
                    );
                    return Ok(UpdateOutcome::Conflicted);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::metric;
    use crate::store::MemoryRecordStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    const TEMP: &str = metric::TEMPERATURE;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, second).unwrap()
    }

    fn create_test_measurement(second: u32, temp_c: f64) -> Measurement {
        // ---
        Measurement {
            id: Uuid::new_v4(),
            timestamp: at(second),
            location: "backyard".to_string(),
            sensor_type: "weatherhat".to_string(),
            metrics: BTreeMap::from([(TEMP.to_string(), temp_c)]),
            wind_cardinal: None,
        }
    }

    fn updater(store: Arc<dyn RecordStore>) -> RecordUpdater {
        RecordUpdater::new(store, vec![TEMP.to_string()], Duration::from_secs(1))
    }

    async fn feed(updater: &RecordUpdater, temps: &[f64]) {
        for (i, t) in temps.iter().enumerate() {
            updater.apply(&create_test_measurement(i as u32, *t)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_occurrence_wins_ties() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let updater = updater(store.clone());

        feed(&updater, &[20.0, 19.5, 21.3, 21.3, 18.0]).await;

        let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
        assert_eq!(highest.value, 21.3);
        // 21.3 first appears as the third reading
        assert_eq!(highest.timestamp, at(2));

        let lowest = store.get_extremum(TEMP, Direction::Lowest).await.unwrap().unwrap();
        assert_eq!(lowest.value, 18.0);
        assert_eq!(lowest.timestamp, at(4));
    }

    #[tokio::test]
    async fn test_highest_is_maximum_of_sequence() {
        // ---
        let sequences: [&[f64]; 4] = [
            &[1.0],
            &[5.0, 4.0, 3.0, 2.0],
            &[-3.0, -1.0, -2.0, -1.0, -7.5],
            &[0.1, 0.2, 0.15, 0.2, 0.3, 0.3, 0.05],
        ];

        for temps in sequences {
            let store = Arc::new(MemoryRecordStore::new());
            feed(&updater(store.clone()), temps).await;

            let max = temps.iter().cloned().fold(f64::MIN, f64::max);
            let min = temps.iter().cloned().fold(f64::MAX, f64::min);
            let first_max = temps.iter().position(|t| *t == max).unwrap() as u32;

            let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
            assert_eq!(highest.value, max, "sequence {temps:?}");
            assert_eq!(highest.timestamp, at(first_max), "sequence {temps:?}");

            let lowest = store.get_extremum(TEMP, Direction::Lowest).await.unwrap().unwrap();
            assert_eq!(lowest.value, min, "sequence {temps:?}");
        }
    }

    #[tokio::test]
    async fn test_report_outcomes() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let updater = updater(store);

        let report = updater.apply(&create_test_measurement(0, 20.0)).await.unwrap();
        assert_eq!(report.written(), 2);
        assert!(report.changes.iter().all(|c| c.outcome == UpdateOutcome::Created));

        let report = updater.apply(&create_test_measurement(1, 20.0)).await.unwrap();
        assert_eq!(report.written(), 0);

        let report = updater.apply(&create_test_measurement(2, 25.0)).await.unwrap();
        let outcomes: Vec<_> = report.changes.iter().map(|c| (c.direction, c.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![
                (Direction::Highest, UpdateOutcome::Replaced),
                (Direction::Lowest, UpdateOutcome::Unchanged),
            ]
        );
    }

    #[tokio::test]
    async fn test_untracked_and_absent_metrics_are_ignored() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let updater = RecordUpdater::new(
            store.clone(),
            vec![TEMP.to_string(), metric::PRESSURE.to_string()],
            Duration::from_secs(1),
        );

        let mut m = create_test_measurement(0, 20.0);
        m.metrics.insert(metric::LIGHT.to_string(), 500.0);
        let report = updater.apply(&m).await.unwrap();

        assert_eq!(report.changes.len(), 2);
        assert!(store.list_extrema().await.unwrap().iter().all(|r| r.metric == TEMP));
    }

    #[tokio::test]
    async fn test_non_finite_value_rejected() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let updater = updater(store.clone());

        let result = updater.apply(&create_test_measurement(0, f64::NAN)).await;
        assert!(matches!(result, Err(CycleError::Normalize(_))));
        assert!(store.list_extrema().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_leaves_records_untouched() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let updater = updater(store.clone());
        feed(&updater, &[20.0]).await;

        store.set_offline(true);
        let result = updater.apply(&create_test_measurement(1, 30.0)).await;
        assert!(matches!(result, Err(CycleError::Store(StoreError::Connection(_)))));

        store.set_offline(false);
        let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
        assert_eq!(highest.value, 20.0);

        updater.apply(&create_test_measurement(2, 30.0)).await.unwrap();
        let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
        assert_eq!(highest.value, 30.0);
    }

    #[tokio::test]
    async fn test_expired_deadline_defers_everything() {
        // ---
        let store = Arc::new(MemoryRecordStore::new());
        let updater = updater(store.clone());

        let report = updater
            .apply_until(&create_test_measurement(0, 20.0), Some(Instant::now()))
            .await
            .unwrap();

        assert_eq!(report.deferred(), 2);
        assert_eq!(report.written(), 0);
        assert!(store.list_extrema().await.unwrap().is_empty());
    }

    /// Wraps a memory store and lets a rival writer land between our fetch
    /// and our replace, `races` times.
    struct RacingStore {
        inner: MemoryRecordStore,
        rival_value: f64,
        races: AtomicU32,
        replace_calls: AtomicU32,
    }

    impl RacingStore {
        fn new(rival_value: f64, races: u32) -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                rival_value,
                races: AtomicU32::new(races),
                replace_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        // ---
        async fn append_measurement(&self, m: &Measurement) -> Result<(), StoreError> {
            self.inner.append_measurement(m).await
        }

        async fn get_extremum(
            &self,
            metric: &str,
            direction: Direction,
        ) -> Result<Option<ExtremumRecord>, StoreError> {
            self.inner.get_extremum(metric, direction).await
        }

        async fn replace_extremum(
            &self,
            metric: &str,
            direction: Direction,
            new_record: &ExtremumRecord,
            expected_previous: Option<&ExtremumRecord>,
        ) -> Result<(), StoreError> {
            // ---
            self.replace_calls.fetch_add(1, Ordering::SeqCst);

            let race = self
                .races
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if race && direction == Direction::Highest {
                let current = self.inner.get_extremum(metric, direction).await?;
                let rival_m = create_test_measurement(59, self.rival_value);
                let rival = ExtremumRecord::successor(
                    metric,
                    direction,
                    self.rival_value,
                    &rival_m,
                    current.as_ref(),
                );
                self.inner
                    .replace_extremum(metric, direction, &rival, current.as_ref())
                    .await?;
            }

            self.inner
                .replace_extremum(metric, direction, new_record, expected_previous)
                .await
        }

        async fn latest_measurements(&self, limit: u32) -> Result<Vec<Measurement>, StoreError> {
            self.inner.latest_measurements(limit).await
        }

        async fn list_extrema(&self) -> Result<Vec<ExtremumRecord>, StoreError> {
            self.inner.list_extrema().await
        }
    }

    async fn seed(store: &RacingStore, value: f64) {
        // ---
        let m = create_test_measurement(0, value);
        let first = ExtremumRecord::successor(TEMP, Direction::Highest, value, &m, None);
        store
            .inner
            .replace_extremum(TEMP, Direction::Highest, &first, None)
            .await
            .unwrap();
    }

    fn highest_only(store: Arc<dyn RecordStore>) -> RecordUpdater {
        // Lowest is untouched by the rival, so only look at highest outcomes
        RecordUpdater::new(store, vec![TEMP.to_string()], Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_rival_with_better_value_wins_without_overwrite() {
        // ---
        let store = Arc::new(RacingStore::new(30.0, 1));
        seed(&store, 20.0).await;

        let report = highest_only(store.clone())
            .apply(&create_test_measurement(1, 25.0))
            .await
            .unwrap();

        // After the conflict we re-fetch, see 30.0 and back off
        assert_eq!(report.changes[0].outcome, UpdateOutcome::Unchanged);
        let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
        assert_eq!(highest.value, 30.0);
        assert_eq!(highest.revision, 2);
    }

    #[tokio::test]
    async fn test_rival_with_worse_value_is_superseded_on_retry() {
        // ---
        let store = Arc::new(RacingStore::new(22.0, 1));
        seed(&store, 20.0).await;

        let report = highest_only(store.clone())
            .apply(&create_test_measurement(1, 25.0))
            .await
            .unwrap();

        assert_eq!(report.changes[0].outcome, UpdateOutcome::Replaced);
        let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
        assert_eq!(highest.value, 25.0);
        // seed, rival, ours
        assert_eq!(highest.revision, 3);
    }

    #[tokio::test]
    async fn test_persistent_conflict_is_bounded() {
        // ---
        let store = Arc::new(RacingStore::new(21.0, 10));
        seed(&store, 20.0).await;

        let report = highest_only(store.clone())
            .apply(&create_test_measurement(1, 100.0))
            .await
            .unwrap();

        assert_eq!(report.changes[0].outcome, UpdateOutcome::Conflicted);
        assert_eq!(report.conflicts(), 1);
        // Highest: initial attempt plus one retry. Lowest: one clean create.
        assert_eq!(store.replace_calls.load(Ordering::SeqCst), 3);

        let highest = store.get_extremum(TEMP, Direction::Highest).await.unwrap().unwrap();
        assert_eq!(highest.value, 21.0);
    }
}
