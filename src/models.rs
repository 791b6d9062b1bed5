//! Data models for sensors, CO2 measurements and alert episodes.
//!
//! Entities reference each other by id only. A [`Sensor`] owns its alerts
//! and measurements for lifecycle purposes, and an [`Alert`] holds the ids
//! of the measurements that make up the episode rather than copies of them.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Health status of a sensor, derived from its recent readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorStatus {
    Ok,
    Warning,
    Alert,
}

impl SensorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Alert => "ALERT",
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "OK" => Ok(Self::Ok),
            "WARNING" => Ok(Self::Warning),
            "ALERT" => Ok(Self::Alert),
            other => Err(format!("unknown sensor status '{other}'")),
        }
    }
}

/// A registered CO2 sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sensor {
    // ---
    pub id: Uuid,
    pub status: SensorStatus,
}

impl Sensor {
    /// Fresh sensor with a random id and status `OK`.
    pub fn register() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SensorStatus::Ok,
        }
    }
}

/// A persisted CO2 reading. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    // ---
    pub id: i64,
    pub sensor_id: Uuid,
    pub co2_quantity: f64,
    pub taken_at: DateTime<Utc>,
}

impl Measurement {
    /// A reading breaches when it strictly exceeds the threshold.
    pub fn is_breach(&self, threshold: f64) -> bool {
        self.co2_quantity > threshold
    }
}

/// Incoming reading as submitted by a caller. Both fields are optional on
/// the wire so that missing values can be reported as invalid arguments
/// instead of deserialization failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeasurement {
    // ---
    pub co2_quantity: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

/// A validated reading that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementDraft {
    // ---
    pub sensor_id: Uuid,
    pub co2_quantity: f64,
    pub taken_at: DateTime<Utc>,
}

impl MeasurementDraft {
    pub fn into_measurement(self, id: i64) -> Measurement {
        Measurement {
            id,
            sensor_id: self.sensor_id,
            co2_quantity: self.co2_quantity,
            taken_at: self.taken_at,
        }
    }
}

/// An alert episode: a run of breaching readings plus any readings appended
/// while the sensor stayed in `ALERT`.
///
/// The alert is open while it is the sensor's most recently created alert and
/// the sensor status is `ALERT`. Closure is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    // ---
    pub id: Uuid,
    pub sensor_id: Uuid,
    /// Timestamp of the reading that triggered the transition into `ALERT`.
    pub created: DateTime<Utc>,
    /// Measurement ids, oldest first.
    pub measurement_ids: Vec<i64>,
}

impl Alert {
    pub fn open(sensor_id: Uuid, created: DateTime<Utc>, measurement_ids: Vec<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sensor_id,
            created,
            measurement_ids,
        }
    }

    /// Append a measurement to the episode. Returns `false` if it was
    /// already part of it.
    pub fn extend(&mut self, measurement_id: i64) -> bool {
        // ---
        if self.measurement_ids.contains(&measurement_id) {
            return false;
        }
        self.measurement_ids.push(measurement_id);
        true
    }
}

/// Caller-facing view of an alert: start and end are derived from the
/// earliest and latest referenced readings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    // ---
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub measurements: Vec<f64>,
}

impl AlertSummary {
    /// Build a summary from the alert's readings. Returns `None` when there
    /// are no readings to derive the time span from.
    pub fn from_measurements(mut measurements: Vec<Measurement>) -> Option<Self> {
        // ---
        measurements.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then(a.id.cmp(&b.id)));

        let start_time = measurements.first()?.taken_at;
        let end_time = measurements.last()?.taken_at;

        Some(Self {
            start_time,
            end_time,
            measurements: measurements.iter().map(|m| m.co2_quantity).collect(),
        })
    }
}

/// Max and average CO2 over a trailing window. Zero when the window is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SensorMetrics {
    // ---
    pub max: f64,
    pub average: f64,
}
