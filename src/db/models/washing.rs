//! Wash cycle data model.
//!
//! A wash cycle is one filter reprocessing session. `residual_volume` and
//! `integrity_test` stay at their pending defaults until the cycle is
//! finalized from its sensor windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WashStatus {
    #[default]
    Active,
    Inactive,
}

impl WashStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WashStatus::Active => "active",
            WashStatus::Inactive => "inactive",
        }
    }
}

/// Stored as `0 | 1 | 2`; a NULL column reads back as `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(into = "i64", try_from = "i64")]
pub enum IntegrityVerdict {
    #[default]
    Pending,
    /// No rupture detected.
    Pass,
    /// Blood leak, the filter is ruptured.
    Fail,
}

impl IntegrityVerdict {
    pub fn code(&self) -> i64 {
        match self {
            IntegrityVerdict::Pending => 0,
            IntegrityVerdict::Pass => 1,
            IntegrityVerdict::Fail => 2,
        }
    }
}

impl From<IntegrityVerdict> for i64 {
    fn from(verdict: IntegrityVerdict) -> Self {
        verdict.code()
    }
}

impl TryFrom<i64> for IntegrityVerdict {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IntegrityVerdict::Pending),
            1 => Ok(IntegrityVerdict::Pass),
            2 => Ok(IntegrityVerdict::Fail),
            other => Err(format!("unknown integrity test code {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WashCycle {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "patient")]
    pub patient_ref: String,
    #[serde(rename = "filter")]
    pub filter_ref: String,
    #[serde(rename = "attended")]
    pub attended_by_ref: Option<String>,
    pub start_date: DateTime<Utc>,
    pub residual_volume: f64,
    pub integrity_test: IntegrityVerdict,
    pub status: WashStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WashCycle {
    /// Nothing has been computed for this cycle yet.
    pub fn is_pending(&self) -> bool {
        self.residual_volume == 0.0 && self.integrity_test == IntegrityVerdict::Pending
    }
}

/// The two derived fields written back when a cycle is finalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WashOutcome {
    pub residual_volume: f64,
    pub integrity_test: IntegrityVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWashCycle {
    pub patient_ref: String,
    pub filter_ref: String,
    pub attended_by_ref: Option<String>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub status: WashStatus,
}

/// Manual edit of a cycle. Derived outcome fields are not editable here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WashEdit {
    pub patient_ref: String,
    pub filter_ref: String,
    pub attended_by_ref: Option<String>,
    pub start_date: DateTime<Utc>,
    pub status: WashStatus,
}
