//! Error taxonomy for the sampling pipeline.
//!
//! Every error that can happen inside one sampling cycle is typed here so the
//! loop can log it with context and move on. Only [`SensorError::DeviceUnavailable`]
//! raised while opening the sensor is fatal, and only at startup.

use std::time::Duration;

use thiserror::Error;

use crate::models::Direction;

// ---

/// Failures of the sensor handle.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The bus or the device is not present. Fatal when opening.
    #[error("sensor device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transient bus error; the cycle is skipped.
    #[error("sensor read failed: {0}")]
    ReadFailure(String),

    #[error("sensor read timed out after {0:?}")]
    ReadTimeout(Duration),
}

/// A raw reading that cannot be turned into a measurement.
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("malformed reading: field `{field}` {reason}")]
    MalformedReading { field: String, reason: String },
}

impl NormalizeError {
    pub(crate) fn missing(field: &str) -> Self {
        NormalizeError::MalformedReading {
            field: field.to_string(),
            reason: "is missing".to_string(),
        }
    }

    pub(crate) fn not_finite(field: &str, value: f64) -> Self {
        NormalizeError::MalformedReading {
            field: field.to_string(),
            reason: format!("is not a finite number ({value})"),
        }
    }
}

/// Failures of the record store. None of these are fatal to the loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store serialization failed: {0}")]
    Serialization(String),

    #[error("store constraint violated: {0}")]
    Constraint(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The stored extremum no longer matches the expected previous record.
    #[error("extremum for {metric}/{direction} changed concurrently")]
    ExtremumConflict { metric: String, direction: Direction },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ExtremumConflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        // ---
        match &e {
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                StoreError::Constraint(db.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::Encode(_) => {
                StoreError::Serialization(e.to_string())
            }
            sqlx::Error::PoolTimedOut => StoreError::Connection("connection pool timed out".into()),
            _ => StoreError::Connection(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// The error of a single sampling cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        // ---
        match self {
            CycleError::Sensor(SensorError::DeviceUnavailable(_)) => "device_unavailable",
            CycleError::Sensor(SensorError::ReadFailure(_)) => "read_failure",
            CycleError::Sensor(SensorError::ReadTimeout(_)) => "read_timeout",
            CycleError::Normalize(_) => "malformed_reading",
            CycleError::Store(StoreError::ExtremumConflict { .. }) => "extremum_conflict",
            CycleError::Store(_) => "store_error",
        }
    }
}
