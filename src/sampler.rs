//! The sampling loop.
//!
//! On every tick: read the sensor, normalize, append the measurement, then
//! update the records. A failing cycle is logged and dropped; the loop only
//! ends when the shutdown future resolves. The loop owns the sensor handle
//! outright, so reads are serialized by construction.
//!
//! A cycle never runs past the next tick: every sensor and store call is
//! bounded by the I/O timeout and by what is left of the interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{CycleError, SensorError};
use crate::models::Measurement;
use crate::normalize::{average_readings, Normalizer};
use crate::records::{RecordUpdater, UpdateReport};
use crate::sensor::{DeviceSample, SensorHandle};
use crate::store::{bounded, RecordStore};
use crate::summary::{Summarizer, SummaryReport};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Sampling,
    Persisting,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Bound on each sensor read and each store call.
    pub io_timeout: Duration,
    pub samples_per_cycle: u32,
    /// Print each stored measurement as one JSON line on stdout.
    pub echo_measurements: bool,
}

/// What one successful cycle produced.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub measurement: Measurement,
    pub records: UpdateReport,
    pub summaries: SummaryReport,
}

pub struct SamplingLoop {
    sensor: SensorHandle,
    normalizer: Normalizer,
    store: Arc<dyn RecordStore>,
    updater: RecordUpdater,
    summarizer: Option<Summarizer>,
    settings: LoopSettings,
    state: LoopState,
    stats: LoopStats,
}

impl SamplingLoop {
    pub fn new(
        sensor: SensorHandle,
        normalizer: Normalizer,
        store: Arc<dyn RecordStore>,
        updater: RecordUpdater,
        settings: LoopSettings,
    ) -> Self {
        Self {
            sensor,
            normalizer,
            store,
            updater,
            summarizer: None,
            settings,
            state: LoopState::Idle,
            stats: LoopStats::default(),
        }
    }

    /// Also write hourly trends and daily reports after each stored measurement.
    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn sensor(&self) -> &SensorHandle {
        &self.sensor
    }

    /// Run until `shutdown` resolves. A cycle in flight when it resolves is
    /// abandoned.
    pub async fn run<F>(&mut self, shutdown: F) -> LoopStats
    where
        F: Future<Output = ()>,
    {
        // ---
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval = ?self.settings.interval,
            driver = self.sensor.driver_name(),
            "Starting sampling loop"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let span = info_span!("cycle", cycle = self.stats.cycles + 1);
            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    warn!("Shutdown requested mid-cycle, abandoning it");
                    break;
                }
                outcome = self.run_cycle().instrument(span) => outcome,
            };

            match outcome {
                Ok(summary) => info!(
                    cycle = self.stats.cycles,
                    timestamp = %summary.measurement.timestamp,
                    records_written = summary.records.written(),
                    conflicts = summary.records.conflicts(),
                    "Measurement stored successfully"
                ),
                Err(e) => error!(
                    cycle = self.stats.cycles,
                    kind = e.kind(),
                    "Sampling cycle failed: {}",
                    e
                ),
            }
        }

        self.state = LoopState::Stopped;
        info!(
            cycles = self.stats.cycles,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            sensor_uptime = ?self.sensor.uptime(),
            "Sampling loop stopped"
        );
        self.stats
    }

    /// Run exactly one cycle and return to `Idle`, whatever the outcome.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, CycleError> {
        // ---
        self.stats.cycles += 1;
        let result = self.cycle().await;
        self.state = LoopState::Idle;

        match result {
            Ok(_) => self.stats.succeeded += 1,
            Err(_) => self.stats.failed += 1,
        }
        result
    }

    async fn cycle(&mut self) -> Result<CycleSummary, CycleError> {
        // ---
        let deadline = Instant::now() + self.settings.interval;

        self.state = LoopState::Sampling;
        let measurement = self.sample(deadline).await?;

        self.state = LoopState::Persisting;
        // Records are only touched once the measurement they cite is in the log
        bounded(
            self.budget(deadline),
            self.store.append_measurement(&measurement),
        )
        .await?;
        let records = self
            .updater
            .apply_until(&measurement, Some(deadline))
            .await?;

        let summaries = match &mut self.summarizer {
            Some(summarizer) => summarizer
                .after_measurement(&measurement, deadline)
                .await
                .unwrap_or_else(|e| {
                    warn!("Summaries skipped this cycle: {}", e);
                    SummaryReport::default()
                }),
            None => SummaryReport::default(),
        };

        if self.settings.echo_measurements {
            match serde_json::to_string(&measurement) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to encode measurement for stdout: {}", e),
            }
        }

        Ok(CycleSummary {
            measurement,
            records,
            summaries,
        })
    }

    async fn sample(&mut self, deadline: Instant) -> Result<Measurement, CycleError> {
        // ---
        let count = self.settings.samples_per_cycle.max(1) as usize;
        let mut snapshots = Vec::with_capacity(count);
        let mut rain_tips = None;
        for _ in 0..count {
            let DeviceSample { fields, rain_tips: tips } = self.read_once(deadline).await?;
            snapshots.push(fields);
            rain_tips = tips.or(rain_tips);
        }

        let mut reading = average_readings(&snapshots)
            .ok_or_else(|| SensorError::ReadFailure("no readings obtained from sensor".into()))?;
        // One gauge update per cycle so the rain rate covers the whole interval
        self.sensor.apply_rain(&mut reading, rain_tips);
        Ok(self.normalizer.normalize(&reading, Utc::now())?)
    }

    async fn read_once(&mut self, deadline: Instant) -> Result<DeviceSample, SensorError> {
        // ---
        let timeout = self.budget(deadline);
        match tokio::time::timeout(timeout, self.sensor.sample()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::ReadTimeout(timeout)),
        }
    }

    /// Bound for the next I/O call: the I/O timeout, or less if the cycle
    /// deadline is closer.
    fn budget(&self, deadline: Instant) -> Duration {
        self.settings
            .io_timeout
            .min(deadline.saturating_duration_since(Instant::now()))
    }
}
