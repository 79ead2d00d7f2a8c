//! Data models for the weather recorder.
//!
//! A [`RawReading`] is what the sensor handle returns, keyed by device-native
//! field names. A [`Measurement`] is the canonical document written to the
//! measurement log, and an [`ExtremumRecord`] is the current all-time high or
//! low of one metric.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Canonical metric names used in measurement documents and extremum keys.
pub mod metric {
    pub const TEMPERATURE: &str = "temperature_c";
    pub const DEVICE_TEMPERATURE: &str = "device_temperature_c";
    pub const HUMIDITY: &str = "humidity_pct";
    pub const DEWPOINT: &str = "dewpoint_c";
    pub const PRESSURE: &str = "pressure_hpa";
    pub const LIGHT: &str = "light_lux";
    pub const WIND_SPEED: &str = "wind_speed_kmh";
    pub const WIND_DIRECTION: &str = "wind_direction_deg";
    pub const RAIN_RATE: &str = "rain_rate_mm_h";
    pub const RAIN_TOTAL: &str = "rain_total_mm";

    /// Metrics tracked for records when nothing else is configured.
    pub const DEFAULT_TRACKED: [&str; 6] = [
        TEMPERATURE,
        HUMIDITY,
        PRESSURE,
        LIGHT,
        WIND_SPEED,
        RAIN_RATE,
    ];
}

/// Snapshot returned by the sensor handle, in device-native units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReading {
    // ---
    pub fields: BTreeMap<String, f64>,
}

impl RawReading {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly used by drivers and tests.
    pub fn with(mut self, field: &str, value: f64) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn insert(&mut self, field: &str, value: f64) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }
}

/// One canonical measurement document. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    // ---
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub sensor_type: String,
    pub metrics: BTreeMap<String, f64>,
    pub wind_cardinal: Option<String>,
}

impl Measurement {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Which end of the range an extremum record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Highest,
    Lowest,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Highest, Direction::Lowest];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Highest => "highest",
            Direction::Lowest => "lowest",
        }
    }

    /// Strict improvement test. Ties never improve, so the first occurrence
    /// of an extreme value keeps its timestamp.
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        // ---
        match self {
            Direction::Highest => candidate > current,
            Direction::Lowest => candidate < current,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s {
            "highest" => Ok(Direction::Highest),
            "lowest" => Ok(Direction::Lowest),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

/// The current known extreme for one (metric, direction) pair.
///
/// `revision` starts at 1 and is bumped on every replacement; the store
/// uses it as the compare-and-swap token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremumRecord {
    // ---
    pub metric: String,
    pub direction: Direction,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub revision: i64,
}

impl ExtremumRecord {
    /// Build the record that would replace `previous` with the value seen in
    /// `measurement`.
    pub fn successor(
        metric: &str,
        direction: Direction,
        value: f64,
        measurement: &Measurement,
        previous: Option<&ExtremumRecord>,
    ) -> Self {
        // ---
        ExtremumRecord {
            metric: metric.to_string(),
            direction,
            value,
            timestamp: measurement.timestamp,
            location: measurement.location.clone(),
            revision: previous.map_or(1, |p| p.revision + 1),
        }
    }
}
