pub mod measurement;
pub mod page;
pub mod washing;

pub use measurement::{Measurement, NewMeasurement, SensorKind, SensorValue, TimeRange};
pub use page::{Page, PageQuery, PaginationInfo, SortOrder};
pub use washing::{IntegrityVerdict, NewWashCycle, WashCycle, WashEdit, WashOutcome, WashStatus};
