//! Store seams consumed by the history and washing subsystems.
//!
//! The SQLite [`Database`] implements both traits; tests swap in fakes that
//! fail or stall on demand.

use anyhow::Result;
use async_trait::async_trait;

use crate::db::{Database, Measurement, SensorKind, TimeRange, WashCycle, WashOutcome};

#[async_trait]
pub trait SensorStore: Send + Sync + 'static {
    /// Readings of one series inside an inclusive range. Order is unspecified.
    async fn fetch_series(&self, kind: SensorKind, range: TimeRange) -> Result<Vec<Measurement>>;
}

#[async_trait]
pub trait WashStore: Send + Sync + 'static {
    async fn list_washings(&self, patient_ref: Option<&str>) -> Result<Vec<WashCycle>>;

    async fn get_washing(&self, washing_id: &str) -> Result<Option<WashCycle>>;

    /// Writes only the derived fields of a cycle.
    async fn update_outcome(&self, washing_id: &str, outcome: WashOutcome) -> Result<()>;
}

#[async_trait]
impl SensorStore for Database {
    async fn fetch_series(&self, kind: SensorKind, range: TimeRange) -> Result<Vec<Measurement>> {
        Database::fetch_series(self, kind, range).await
    }
}

#[async_trait]
impl WashStore for Database {
    async fn list_washings(&self, patient_ref: Option<&str>) -> Result<Vec<WashCycle>> {
        Database::list_washings(self, patient_ref).await
    }

    async fn get_washing(&self, washing_id: &str) -> Result<Option<WashCycle>> {
        Database::get_washing(self, washing_id).await
    }

    async fn update_outcome(&self, washing_id: &str, outcome: WashOutcome) -> Result<()> {
        Database::update_outcome(self, washing_id, outcome).await
    }
}
