//! Driver for a weather board exposed through an HTTP bridge.
//!
//! The bridge answers `GET <url>` with one flat JSON object of current
//! values, for example:
//!
//! ```json
//! { "temperature": 21.4, "humidity": 48.0, "pressure": 1012.8, "lux": 310.0,
//!   "wind_speed": 1.2, "wind_direction": 225.0, "rain_tips": 154 }
//! ```
//!
//! `rain_tips` is the cumulative bucket counter. Every other numeric member
//! is passed through as a raw field; non-numeric members become NaN so the
//! normalizer can reject them if they are ones it needs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{DeviceSample, SensorDriver};
use crate::error::SensorError;
use crate::models::RawReading;

// ---

const RAIN_TIPS_FIELD: &str = "rain_tips";

pub struct HttpSensor {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSensor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SensorError> {
        // ---
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SensorError::DeviceUnavailable(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    async fn fetch(&self) -> Result<Value, SensorError> {
        // ---
        tracing::debug!("Fetching sensor snapshot from: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?
            .error_for_status()
            .map_err(|e| SensorError::ReadFailure(e.to_string()))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| SensorError::ReadFailure(format!("invalid snapshot body: {e}")))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> SensorError {
        if e.is_timeout() {
            SensorError::ReadTimeout(self.timeout)
        } else {
            SensorError::ReadFailure(e.to_string())
        }
    }
}

/// Convert a bridge snapshot into a device sample.
pub fn parse_snapshot(snapshot: &Value) -> Result<DeviceSample, SensorError> {
    // ---
    let object = snapshot
        .as_object()
        .ok_or_else(|| SensorError::ReadFailure("snapshot is not a JSON object".into()))?;

    let mut fields = RawReading::new();
    let mut rain_tips = None;

    for (name, value) in object {
        if name == RAIN_TIPS_FIELD {
            rain_tips = Some(value.as_u64().ok_or_else(|| {
                SensorError::ReadFailure(format!("`{RAIN_TIPS_FIELD}` is not a counter: {value}"))
            })?);
            continue;
        }
        fields.insert(name, value.as_f64().unwrap_or(f64::NAN));
    }

    Ok(DeviceSample { fields, rain_tips })
}

#[async_trait]
impl SensorDriver for HttpSensor {
    // ---
    fn name(&self) -> &'static str {
        "http"
    }

    async fn probe(&mut self) -> Result<(), SensorError> {
        // ---
        self.fetch()
            .await
            .map(|_| ())
            .map_err(|e| SensorError::DeviceUnavailable(format!("{}: {e}", self.url)))
    }

    async fn sample(&mut self) -> Result<DeviceSample, SensorError> {
        let snapshot = self.fetch().await?;
        parse_snapshot(&snapshot)
    }
}
