//! In-process stand-in for the weather board.
//!
//! Produces smooth, deterministic values and a rain tip counter that only
//! ever grows, which is enough to exercise the whole pipeline without
//! hardware.

use async_trait::async_trait;

use super::{DeviceSample, SensorDriver};
use crate::error::SensorError;
use crate::models::RawReading;
use crate::normalize::raw;

// ---

/// One bucket tip every this many samples.
const TIP_EVERY: u64 = 3;

#[derive(Debug)]
pub struct SimulatedSensor {
    present: bool,
    samples: u64,
    tips: u64,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            present: true,
            samples: 0,
            tips: 0,
        }
    }

    /// A device that is not on the bus; `probe` fails.
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

/// Magnus approximation of the dew point.
fn dewpoint(temp_c: f64, humidity_pct: f64) -> f64 {
    // ---
    const A: f64 = 17.27;
    const B: f64 = 237.7;
    let gamma = (A * temp_c) / (B + temp_c) + (humidity_pct / 100.0).ln();
    (B * gamma) / (A - gamma)
}

#[async_trait]
impl SensorDriver for SimulatedSensor {
    // ---
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn probe(&mut self) -> Result<(), SensorError> {
        // ---
        if self.present {
            Ok(())
        } else {
            Err(SensorError::DeviceUnavailable(
                "simulated device is not attached".to_string(),
            ))
        }
    }

    async fn sample(&mut self) -> Result<DeviceSample, SensorError> {
        // ---
        if !self.present {
            return Err(SensorError::ReadFailure("simulated device is not attached".into()));
        }

        self.samples += 1;
        if self.samples % TIP_EVERY == 0 {
            self.tips += 1;
        }

        let t = self.samples as f64;
        let temperature = 18.0 + 4.0 * (t * 0.05).sin();
        let humidity = 55.0 + 10.0 * (t * 0.03).cos();

        let fields = RawReading::new()
            .with(raw::TEMPERATURE, temperature)
            .with(raw::DEVICE_TEMPERATURE, temperature + 8.0)
            .with(raw::HUMIDITY, humidity)
            .with(raw::DEWPOINT, dewpoint(temperature, humidity))
            .with(raw::PRESSURE, 1013.0 + 2.0 * (t * 0.01).sin())
            .with(raw::LUX, 400.0 + 300.0 * (t * 0.02).sin().abs())
            .with(raw::WIND_SPEED, 2.0 + 1.5 * (t * 0.07).sin().abs())
            .with(raw::WIND_DIRECTION, (self.samples * 7 % 360) as f64);

        Ok(DeviceSample {
            fields,
            rain_tips: Some(self.tips),
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_tip_counter_only_grows() {
        // ---
        let mut sensor = SimulatedSensor::new();
        let mut last = 0;
        for _ in 0..30 {
            let sample = sensor.sample().await.unwrap();
            let tips = sample.rain_tips.unwrap();
            assert!(tips >= last);
            last = tips;
        }
        assert_eq!(last, 30 / TIP_EVERY);
    }

    #[tokio::test]
    async fn test_absent_device_fails_probe() {
        // ---
        let mut sensor = SimulatedSensor::absent();
        assert!(matches!(
            sensor.probe().await,
            Err(SensorError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_dewpoint_below_temperature() {
        // ---
        let dp = dewpoint(20.0, 50.0);
        assert!(dp < 20.0);
        assert!((dp - 9.3).abs() < 0.5);
    }
}
