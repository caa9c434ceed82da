//! Whether a wash cycle is waiting, ready to be finalized, or done.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{db::WashCycle, history::DisplayTimezone};

pub const DEFAULT_FINALIZE_AFTER_MINUTES: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WashPhase {
    /// Outcome not computed and the cycle is still too young.
    Pending,
    Eligible,
    Finalized,
}

#[derive(Debug, Clone, Copy)]
pub struct EligibilityRule {
    min_age: Duration,
    tz: DisplayTimezone,
}

impl EligibilityRule {
    pub fn new(min_age: Duration, tz: DisplayTimezone) -> Self {
        Self { min_age, tz }
    }

    pub fn phase(&self, cycle: &WashCycle, now: DateTime<Utc>) -> WashPhase {
        if !cycle.is_pending() {
            return WashPhase::Finalized;
        }
        if self.tz.elapsed_since(cycle.start_date, now) >= self.min_age {
            WashPhase::Eligible
        } else {
            WashPhase::Pending
        }
    }

    pub fn is_eligible(&self, cycle: &WashCycle, now: DateTime<Utc>) -> bool {
        self.phase(cycle, now) == WashPhase::Eligible
    }
}

impl Default for EligibilityRule {
    fn default() -> Self {
        Self::new(
            Duration::minutes(DEFAULT_FINALIZE_AFTER_MINUTES),
            DisplayTimezone::default(),
        )
    }
}
