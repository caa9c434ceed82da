//! Display timezone.
//!
//! Stored timestamps (`startDate`, `capturedAt`) are wall-clock readings of the
//! department's local time tagged as UTC. Only the process clock has to be
//! shifted before it can be compared against them.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};

/// Montevideo has stayed on UTC-03:00 without DST since 2015.
pub const MONTEVIDEO_UTC_OFFSET_MINUTES: i32 = -180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayTimezone {
    offset: FixedOffset,
}

impl DisplayTimezone {
    pub fn from_utc_offset_minutes(minutes: i32) -> Result<Self> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| anyhow!("invalid UTC offset of {minutes} minutes"))?;
        Ok(Self { offset })
    }

    pub fn montevideo() -> Self {
        Self {
            offset: FixedOffset::east_opt(MONTEVIDEO_UTC_OFFSET_MINUTES * 60)
                .expect("UTC-03:00 is a valid offset"),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn wall_clock(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    /// `now` expressed the way the store writes timestamps.
    pub fn stamp_now(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.wall_clock(now).and_utc()
    }

    /// Real instant behind a stored wall-clock stamp.
    pub fn to_instant(&self, stamp: DateTime<Utc>) -> DateTime<Utc> {
        stamp - Duration::seconds(i64::from(self.offset.local_minus_utc()))
    }

    /// Time elapsed since a stored stamp, measured on the local wall clock.
    pub fn elapsed_since(&self, stamp: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        self.stamp_now(now) - stamp
    }

    pub fn format(&self, stamp: DateTime<Utc>) -> String {
        stamp.format("%d/%m/%Y %H:%M:%S").to_string()
    }
}

impl Default for DisplayTimezone {
    fn default() -> Self {
        Self::montevideo()
    }
}
