mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{
    IntegrityVerdict, Measurement, NewMeasurement, NewWashCycle, Page, PageQuery,
    PaginationInfo, SensorKind, SensorValue, SortOrder, TimeRange, WashCycle, WashEdit,
    WashOutcome, WashStatus,
};
