//! Sensor series data model.
//!
//! Four independent series are captured by the ingestion path: color (blood
//! leak detector), flow rate, temperature and ultrasound distance. Readings are
//! immutable once written.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    Color,
    Flow,
    Temperature,
    Ultrasound,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Color,
        SensorKind::Flow,
        SensorKind::Temperature,
        SensorKind::Ultrasound,
    ];

    /// Collection name, shared by the SQLite table and the public API.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Color => "colors",
            SensorKind::Flow => "flows",
            SensorKind::Temperature => "temperatures",
            SensorKind::Ultrasound => "ultrasounds",
        }
    }

    /// Colors carry categorical codes, every other series is numeric.
    pub fn is_categorical(&self) -> bool {
        matches!(self, SensorKind::Color)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SensorValue {
    Numeric(f64),
    Code(String),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Numeric(value) => Some(*value),
            SensorValue::Code(code) => code.trim().parse().ok(),
        }
    }

    pub fn as_code(&self) -> Option<&str> {
        match self {
            SensorValue::Code(code) => Some(code.as_str()),
            SensorValue::Numeric(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: Option<String>,
    pub value: SensorValue,
    #[serde(rename = "createdAt")]
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeasurement {
    pub name: Option<String>,
    pub value: SensorValue,
    pub captured_at: DateTime<Utc>,
}

/// Inclusive `[start, end]` filter on `captured_at`; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}
