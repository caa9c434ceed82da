//! Residual volume and integrity verdict derived from a sensor bundle.
//!
//! The history view and the finalizer use different residual volume
//! formulas over the same ultrasound reading. Both are kept as-is.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::db::{IntegrityVerdict, Measurement, SensorValue, WashOutcome};

use super::fetch::SensorBundle;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Ultrasound distance of a full filter, in the sensor's unit.
pub const FULL_DISTANCE: f64 = 19.0;
/// Sensor mounting offset subtracted from every ultrasound reading.
pub const SENSOR_OFFSET: f64 = 0.3;
/// Filter radius; the cross-section is `π·r²`.
pub const FILTER_RADIUS: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorCodes {
    /// No visible blood.
    pub baseline: String,
    pub leak: String,
}

impl Default for ColorCodes {
    fn default() -> Self {
        Self {
            baseline: "clear".to_string(),
            leak: "red".to_string(),
        }
    }
}

/// Chronologically last reading. Ties go to the one stored later.
pub fn latest(series: &[Measurement]) -> Option<&Measurement> {
    series.iter().max_by_key(|m| m.captured_at)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn numeric(measurement: &Measurement) -> f64 {
    measurement.value.as_f64().unwrap_or_else(|| {
        log_warn!(
            "Reading {} has non-numeric value {:?}, counting it as 0",
            measurement.id,
            measurement.value
        );
        0.0
    })
}

fn last_numeric(series: &[Measurement]) -> f64 {
    latest(series).map(numeric).unwrap_or(0.0)
}

fn cross_section() -> f64 {
    PI * FILTER_RADIUS * FILTER_RADIUS
}

/// Volume shown in the wash detail: `π·4·last`.
pub fn residual_volume_for_display(ultrasound: &[Measurement]) -> f64 {
    round2(cross_section() * last_numeric(ultrasound))
}

/// Volume persisted on finalization: `π·4·max(0, 19 - (last - 0.3))`.
pub fn residual_volume_for_finalization(ultrasound: &[Measurement]) -> f64 {
    let level = (FULL_DISTANCE - (last_numeric(ultrasound) - SENSOR_OFFSET)).max(0.0);
    round2(cross_section() * level)
}

/// Pass when the last color reading is the baseline code or no reading exists.
pub fn integrity_verdict(colors: &[Measurement], codes: &ColorCodes) -> IntegrityVerdict {
    let Some(last) = latest(colors) else {
        return IntegrityVerdict::Pass;
    };

    let code = match &last.value {
        SensorValue::Code(code) => code.trim().to_string(),
        SensorValue::Numeric(value) => value.to_string(),
    };

    if code == codes.baseline {
        IntegrityVerdict::Pass
    } else {
        if code != codes.leak {
            log_debug!("Unknown color code {code:?} on reading {}, treating as leak", last.id);
        }
        IntegrityVerdict::Fail
    }
}

pub fn display_outcome(bundle: &SensorBundle, codes: &ColorCodes) -> WashOutcome {
    WashOutcome {
        residual_volume: residual_volume_for_display(&bundle.water_level),
        integrity_test: integrity_verdict(&bundle.blood_leak, codes),
    }
}

pub fn finalization_outcome(bundle: &SensorBundle, codes: &ColorCodes) -> WashOutcome {
    WashOutcome {
        residual_volume: residual_volume_for_finalization(&bundle.water_level),
        integrity_test: integrity_verdict(&bundle.blood_leak, codes),
    }
}
