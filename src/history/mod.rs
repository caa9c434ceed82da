pub mod derived;
pub mod fetch;
pub mod timezone;
pub mod view;
pub mod window;

pub use derived::{
    display_outcome, finalization_outcome, integrity_verdict, latest, residual_volume_for_display,
    residual_volume_for_finalization, ColorCodes,
};
pub use fetch::{
    retry_with_timeout, FetchError, FetchHandle, FetchPolicy, LoadingFlags, SensorBundle,
    SensorFetcher,
};
pub use timezone::DisplayTimezone;
pub use view::{FilterUsage, HistoryService, WashDetail};
pub use window::{window_minutes, SensorWindow, WindowPlanner};
