//! Sensor handle and device drivers.
//!
//! A [`SensorHandle`] is opened once per process and owns everything that
//! must survive between reads: the driver connection and the rain gauge.
//! `read` takes `&mut self`, so only one caller can use the handle at a time.
//! Dropping the handle and opening a new one starts the rain accumulation
//! over; the first read after that reports no rain rate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SensorError;
use crate::models::RawReading;
use crate::normalize::raw;

mod http;
mod rain;
mod simulated;

pub use http::{parse_snapshot, HttpSensor};
pub use rain::{RainGauge, RainSample, MM_PER_TIP, RESET_AFTER};
pub use simulated::SimulatedSensor;

// ---

/// What a driver returns for one read, before rain is derived.
#[derive(Debug, Clone, Default)]
pub struct DeviceSample {
    pub fields: RawReading,
    /// Cumulative rain bucket tips since the device powered up.
    pub rain_tips: Option<u64>,
}

/// Access to one physical (or simulated) weather board.
#[async_trait]
pub trait SensorDriver: Send {
    fn name(&self) -> &'static str;

    /// Check that the device is reachable. Called once by [`SensorHandle::open`].
    async fn probe(&mut self) -> Result<(), SensorError>;

    async fn sample(&mut self) -> Result<DeviceSample, SensorError>;
}

/// Which driver the process should open.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverKind {
    Simulated,
    Http { url: String },
}

impl DriverKind {
    /// Build the driver. `timeout` bounds every bus call of HTTP drivers.
    pub fn build(&self, timeout: Duration) -> Result<Box<dyn SensorDriver>, SensorError> {
        // ---
        match self {
            DriverKind::Simulated => Ok(Box::new(SimulatedSensor::new())),
            DriverKind::Http { url } => Ok(Box::new(HttpSensor::new(url.clone(), timeout)?)),
        }
    }
}

pub struct SensorHandle {
    driver: Box<dyn SensorDriver>,
    rain: RainGauge,
    opened_at: Instant,
    reads: u64,
}

impl SensorHandle {
    /// Acquire the device. Any failure here is reported as `DeviceUnavailable`.
    pub async fn open(mut driver: Box<dyn SensorDriver>) -> Result<Self, SensorError> {
        // ---
        let name = driver.name();
        driver.probe().await.map_err(|e| match e {
            SensorError::DeviceUnavailable(_) => e,
            other => SensorError::DeviceUnavailable(format!("{name}: {other}")),
        })?;

        info!(driver = name, "Sensor handle opened");
        Ok(Self {
            driver,
            rain: RainGauge::new(),
            opened_at: Instant::now(),
            reads: 0,
        })
    }

    /// Read one raw snapshot and fold the rain counter into `rain` (mm/s)
    /// and `rain_total` (mm).
    pub async fn read(&mut self) -> Result<RawReading, SensorError> {
        // ---
        let DeviceSample {
            mut fields,
            rain_tips,
        } = self.sample().await?;

        self.apply_rain(&mut fields, rain_tips);
        Ok(fields)
    }

    /// Read one raw snapshot without touching the rain gauge.
    ///
    /// Callers that combine several snapshots into one reading feed the
    /// gauge once per reading through [`SensorHandle::apply_rain`], so the
    /// rate always spans the time since the previous reading.
    pub async fn sample(&mut self) -> Result<DeviceSample, SensorError> {
        // ---
        let sample = self.driver.sample().await?;
        self.reads += 1;
        debug!(reads = self.reads, "Sensor read complete");
        Ok(sample)
    }

    /// Fold a cumulative tip count into `reading` as `rain` and `rain_total`.
    /// Does nothing when the device reported no counter.
    pub fn apply_rain(&mut self, reading: &mut RawReading, rain_tips: Option<u64>) {
        // ---
        if let Some(tips) = rain_tips {
            let rain = self.rain.record(tips, Instant::now());
            reading.insert(raw::RAIN, rain.rate_mm_s);
            reading.insert(raw::RAIN_TOTAL, rain.total_mm);
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Successful reads since the handle was opened.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn rain_gauge(&self) -> &RainGauge {
        &self.rain
    }
}
