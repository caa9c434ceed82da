//! Time windows scoping each sensor series to one wash cycle.
//!
//! Sensors free-run; a cycle only owns the slice of each stream that starts at
//! its `startDate`. Widths differ per sensor and match the recorded data.

use chrono::{DateTime, Duration, Utc};

use crate::db::{SensorKind, TimeRange};

use super::timezone::DisplayTimezone;

pub fn window_minutes(kind: SensorKind) -> i64 {
    match kind {
        SensorKind::Color => 20,
        SensorKind::Flow => 30,
        SensorKind::Temperature => 30,
        SensorKind::Ultrasound => 30,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorWindow {
    pub kind: SensorKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SensorWindow {
    pub fn for_cycle(kind: SensorKind, start: DateTime<Utc>) -> Self {
        Self {
            kind,
            start,
            end: start + Duration::milliseconds(window_minutes(kind) * 60_000),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::between(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowPlanner {
    tz: DisplayTimezone,
}

impl WindowPlanner {
    pub fn new(tz: DisplayTimezone) -> Self {
        Self { tz }
    }

    pub fn window(&self, kind: SensorKind, start: DateTime<Utc>) -> SensorWindow {
        SensorWindow::for_cycle(kind, start)
    }

    /// One window per series, in `SensorKind::ALL` order.
    pub fn windows(&self, start: DateTime<Utc>) -> [SensorWindow; 4] {
        SensorKind::ALL.map(|kind| self.window(kind, start))
    }

    /// Whether every window of a cycle has closed on the local wall clock.
    pub fn is_complete(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let widest = SensorKind::ALL
            .iter()
            .map(|kind| self.window(*kind, start).end)
            .max()
            .unwrap_or(start);
        self.tz.stamp_now(now) >= widest
    }

    pub fn describe(&self, window: &SensorWindow) -> String {
        format!(
            "{} [{} - {}]",
            window.kind,
            self.tz.format(window.start),
            self.tz.format(window.end)
        )
    }
}
