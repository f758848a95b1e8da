//! Track cadences and fire-time arithmetic

use crate::Timestamp;
use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a track's cycle turns over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Every day at 00:00 local
    Daily,
    /// Wednesdays at 00:01 local
    Weekly,
    /// The 1st of the month at 00:01 local
    Monthly,
}

impl Cadence {
    /// Local wall-clock time the cycle fires.
    pub fn fire_time(&self) -> NaiveTime {
        match self {
            Cadence::Daily => NaiveTime::MIN,
            Cadence::Weekly | Cadence::Monthly => NaiveTime::MIN + Duration::minutes(1),
        }
    }

    fn fires_on(&self, date: NaiveDate) -> bool {
        match self {
            Cadence::Daily => true,
            Cadence::Weekly => date.weekday() == Weekday::Wed,
            Cadence::Monthly => date.day() == 1,
        }
    }

    /// First fire time strictly after `now`, with local time at `offset`.
    pub fn next_after(&self, now: Timestamp, offset: FixedOffset) -> Timestamp {
        let local_now = now.with_timezone(&offset).naive_local();
        let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
        let today = local_now.date();

        (0..=62)
            .filter_map(|days| today.checked_add_signed(Duration::days(days)))
            .filter(|date| self.fires_on(*date))
            .map(|date| date.and_time(self.fire_time()))
            .find(|candidate| *candidate > local_now)
            .map(|local| Utc.from_utc_datetime(&(local - shift)))
            .unwrap_or_else(|| now + Duration::days(1))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily => f.write_str("daily"),
            Cadence::Weekly => f.write_str("weekly"),
            Cadence::Monthly => f.write_str("monthly"),
        }
    }
}
