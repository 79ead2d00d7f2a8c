//! Measurement normalizer.
//!
//! Maps the device-native fields of a [`RawReading`] onto the canonical
//! metric names of a [`Measurement`], converting units where the two differ.
//! Normalization is pure: the caller supplies the timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::NormalizeError;
use crate::models::{metric, Measurement, RawReading};

// ---

/// Device-native field names as produced by the sensor handle.
pub mod raw {
    pub const TEMPERATURE: &str = "temperature";
    pub const DEVICE_TEMPERATURE: &str = "device_temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const DEWPOINT: &str = "dewpoint";
    pub const PRESSURE: &str = "pressure";
    pub const LUX: &str = "lux";
    /// Metres per second.
    pub const WIND_SPEED: &str = "wind_speed";
    /// Degrees, not necessarily wrapped.
    pub const WIND_DIRECTION: &str = "wind_direction";
    /// Millimetres per second.
    pub const RAIN: &str = "rain";
    /// Millimetres since the last daily reset.
    pub const RAIN_TOTAL: &str = "rain_total";
}

const MPS_TO_KMH: f64 = 3.6;
const PER_SECOND_TO_PER_HOUR: f64 = 3600.0;

struct FieldMapping {
    raw: &'static str,
    canonical: &'static str,
    scale: f64,
    required: bool,
}

const fn required(raw: &'static str, canonical: &'static str, scale: f64) -> FieldMapping {
    FieldMapping {
        raw,
        canonical,
        scale,
        required: true,
    }
}

const fn optional(raw: &'static str, canonical: &'static str) -> FieldMapping {
    FieldMapping {
        raw,
        canonical,
        scale: 1.0,
        required: false,
    }
}

const FIELD_MAP: [FieldMapping; 10] = [
    required(raw::TEMPERATURE, metric::TEMPERATURE, 1.0),
    required(raw::HUMIDITY, metric::HUMIDITY, 1.0),
    required(raw::PRESSURE, metric::PRESSURE, 1.0),
    required(raw::LUX, metric::LIGHT, 1.0),
    required(raw::WIND_SPEED, metric::WIND_SPEED, MPS_TO_KMH),
    required(raw::WIND_DIRECTION, metric::WIND_DIRECTION, 1.0),
    required(raw::RAIN, metric::RAIN_RATE, PER_SECOND_TO_PER_HOUR),
    required(raw::RAIN_TOTAL, metric::RAIN_TOTAL, 1.0),
    optional(raw::DEWPOINT, metric::DEWPOINT),
    optional(raw::DEVICE_TEMPERATURE, metric::DEVICE_TEMPERATURE),
];

const CARDINALS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// Turns raw readings into measurement documents for one deployment.
#[derive(Debug, Clone)]
pub struct Normalizer {
    location: String,
    sensor_type: String,
}

impl Normalizer {
    // ---
    pub fn new(location: impl Into<String>, sensor_type: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            sensor_type: sensor_type.into(),
        }
    }

    /// Build a measurement from `reading` observed at `timestamp`.
    ///
    /// Fails with `MalformedReading` if a required field is absent, or if
    /// any mapped field (required or optional) is NaN or infinite.
    pub fn normalize(
        &self,
        reading: &RawReading,
        timestamp: DateTime<Utc>,
    ) -> Result<Measurement, NormalizeError> {
        // ---
        let mut metrics = BTreeMap::new();

        for mapping in &FIELD_MAP {
            let value = match reading.get(mapping.raw) {
                Some(v) => v,
                None if mapping.required => return Err(NormalizeError::missing(mapping.raw)),
                None => continue,
            };
            if !value.is_finite() {
                return Err(NormalizeError::not_finite(mapping.raw, value));
            }

            let mut canonical = value * mapping.scale;
            if mapping.canonical == metric::WIND_DIRECTION {
                canonical = canonical.rem_euclid(360.0);
            }
            metrics.insert(mapping.canonical.to_string(), canonical);
        }

        let wind_cardinal = metrics
            .get(metric::WIND_DIRECTION)
            .map(|deg| degrees_to_cardinal(*deg).to_string());

        Ok(Measurement {
            id: Uuid::new_v4(),
            timestamp,
            location: self.location.clone(),
            sensor_type: self.sensor_type.clone(),
            metrics,
            wind_cardinal,
        })
    }
}

/// 8-point compass name for a bearing in degrees.
pub fn degrees_to_cardinal(degrees: f64) -> &'static str {
    // ---
    let wrapped = degrees.rem_euclid(360.0);
    let index = ((wrapped + 22.5) / 45.0).floor() as usize % CARDINALS.len();
    CARDINALS[index]
}

/// Combine several raw reads taken within one cycle.
///
/// Fields are averaged arithmetically, except wind direction (circular mean)
/// and the rain fields, which are already accumulated by the sensor handle
/// and are taken from the last read. Returns `None` for an empty slice.
pub fn average_readings(readings: &[RawReading]) -> Option<RawReading> {
    // ---
    let last = readings.last()?;
    if readings.len() == 1 {
        return Some(last.clone());
    }

    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    let (mut sin_sum, mut cos_sum, mut direction_count) = (0.0_f64, 0.0_f64, 0usize);

    for reading in readings {
        for (field, value) in &reading.fields {
            match field.as_str() {
                raw::RAIN | raw::RAIN_TOTAL => {}
                raw::WIND_DIRECTION => {
                    let rad = value.to_radians();
                    sin_sum += rad.sin();
                    cos_sum += rad.cos();
                    direction_count += 1;
                }
                name => {
                    let entry = sums.entry(name).or_insert((0.0, 0));
                    entry.0 += value;
                    entry.1 += 1;
                }
            }
        }
    }

    let mut averaged = RawReading::new();
    for (field, (sum, count)) in sums {
        averaged.insert(field, sum / count as f64);
    }
    if direction_count > 0 {
        let mean = sin_sum.atan2(cos_sum).to_degrees();
        averaged.insert(raw::WIND_DIRECTION, mean.rem_euclid(360.0));
    }
    for field in [raw::RAIN, raw::RAIN_TOTAL] {
        if let Some(v) = last.get(field) {
            averaged.insert(field, v);
        }
    }

    Some(averaged)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_raw_reading(temp_c: f64, humidity: f64) -> RawReading {
        // ---
        RawReading::new()
            .with(raw::TEMPERATURE, temp_c)
            .with(raw::HUMIDITY, humidity)
            .with(raw::PRESSURE, 1013.2)
            .with(raw::LUX, 350.0)
            .with(raw::WIND_SPEED, 5.0)
            .with(raw::WIND_DIRECTION, 90.0)
            .with(raw::RAIN, 0.001)
            .with(raw::RAIN_TOTAL, 2.5)
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap()
    }

    fn normalizer() -> Normalizer {
        Normalizer::new("backyard", "weatherhat")
    }

    #[test]
    fn test_unit_conversion() {
        // ---
        let m = normalizer().normalize(&create_test_raw_reading(22.4, 50.0), ts()).unwrap();

        // Celsius passes through unchanged
        assert_eq!(m.metric(metric::TEMPERATURE), Some(22.4));
        // 5 m/s is 18 km/h
        assert!((m.metric(metric::WIND_SPEED).unwrap() - 18.0).abs() < 1e-9);
        // 0.001 mm/s is 3.6 mm/h
        assert!((m.metric(metric::RAIN_RATE).unwrap() - 3.6).abs() < 1e-9);
        assert_eq!(m.metric(metric::RAIN_TOTAL), Some(2.5));
        assert_eq!(m.wind_cardinal.as_deref(), Some("E"));
    }

    #[test]
    fn test_data_preservation() {
        // ---
        let m = normalizer().normalize(&create_test_raw_reading(20.0, 45.0), ts()).unwrap();

        assert_eq!(m.timestamp, ts());
        assert_eq!(m.location, "backyard");
        assert_eq!(m.sensor_type, "weatherhat");
        assert_eq!(m.metric(metric::HUMIDITY), Some(45.0));
        assert_eq!(m.metric(metric::PRESSURE), Some(1013.2));
        assert_eq!(m.metric(metric::LIGHT), Some(350.0));
        // Optional fields absent from the raw reading are absent here too
        assert_eq!(m.metric(metric::DEWPOINT), None);
    }

    #[test]
    fn test_missing_required_field() {
        // ---
        let mut reading = create_test_raw_reading(20.0, 45.0);
        reading.fields.remove(raw::TEMPERATURE);

        let err = normalizer().normalize(&reading, ts()).unwrap_err();
        assert_eq!(err, NormalizeError::missing(raw::TEMPERATURE));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        // ---
        let reading = create_test_raw_reading(f64::NAN, 45.0);
        assert!(normalizer().normalize(&reading, ts()).is_err());

        let reading = create_test_raw_reading(20.0, f64::INFINITY);
        assert!(normalizer().normalize(&reading, ts()).is_err());

        // Optional fields are checked too when they are present
        let reading = create_test_raw_reading(20.0, 45.0).with(raw::DEWPOINT, f64::NAN);
        let err = normalizer().normalize(&reading, ts()).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::MalformedReading { ref field, .. } if field == raw::DEWPOINT
        ));
    }

    #[test]
    fn test_wind_direction_wraps() {
        // ---
        let reading = create_test_raw_reading(20.0, 45.0).with(raw::WIND_DIRECTION, 370.0);
        let m = normalizer().normalize(&reading, ts()).unwrap();
        assert!((m.metric(metric::WIND_DIRECTION).unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(m.wind_cardinal.as_deref(), Some("N"));
    }

    #[test]
    fn test_degrees_to_cardinal() {
        // ---
        assert_eq!(degrees_to_cardinal(0.0), "N");
        assert_eq!(degrees_to_cardinal(22.4), "N");
        assert_eq!(degrees_to_cardinal(22.5), "NE");
        assert_eq!(degrees_to_cardinal(180.0), "S");
        assert_eq!(degrees_to_cardinal(337.5), "N");
        assert_eq!(degrees_to_cardinal(-90.0), "W");
    }

    #[test]
    fn test_average_readings() {
        // ---
        let readings = [
            create_test_raw_reading(20.0, 50.0).with(raw::WIND_DIRECTION, 90.0),
            create_test_raw_reading(22.0, 52.0).with(raw::WIND_DIRECTION, 100.0),
            create_test_raw_reading(21.0, 51.0)
                .with(raw::WIND_DIRECTION, 110.0)
                .with(raw::RAIN_TOTAL, 3.0),
        ];

        let avg = average_readings(&readings).unwrap();
        assert!((avg.get(raw::TEMPERATURE).unwrap() - 21.0).abs() < 1e-9);
        assert!((avg.get(raw::HUMIDITY).unwrap() - 51.0).abs() < 1e-9);
        assert!((avg.get(raw::WIND_DIRECTION).unwrap() - 100.0).abs() < 1e-9);
        // Rain is cumulative, so the last read wins
        assert_eq!(avg.get(raw::RAIN_TOTAL), Some(3.0));
    }

    #[test]
    fn test_wind_direction_averaging_across_north() {
        // ---
        let readings = [
            RawReading::new().with(raw::WIND_DIRECTION, 350.0),
            RawReading::new().with(raw::WIND_DIRECTION, 10.0),
            RawReading::new().with(raw::WIND_DIRECTION, 370.0),
        ];

        let direction = average_readings(&readings).unwrap().get(raw::WIND_DIRECTION).unwrap();
        assert!(
            direction < 10.0 || direction > 350.0,
            "Wind direction average {direction} should be close to North"
        );
    }

    #[test]
    fn test_average_of_nothing() {
        assert_eq!(average_readings(&[]), None);
    }
}
