#![forbid(unsafe_code)]

//! ISO-8601 week partitioning.
//!
//! Weeks start Monday 00:00 UTC and week 1 of a year is the week holding
//! that year's first Thursday. Buckets never overlap and cover all time.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_contracts::ContractViolation;

/// Half-open `[start, end)` instant range of one week bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WeekBounds {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

pub fn bucket_for(ts: DateTime<Utc>) -> Result<WeekBucket, ContractViolation> {
    let iso = ts.iso_week();
    WeekBucket::new(iso.year(), iso.week())
}

pub fn bounds_of(bucket: WeekBucket) -> Result<WeekBounds, ContractViolation> {
    let monday = bucket.first_day().ok_or(ContractViolation::InvalidValue {
        field: "week_bucket.iso_week",
        reason: "week does not exist in this ISO year",
    })?;
    let start = Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN));
    Ok(WeekBounds {
        start,
        end: start + Duration::days(7),
    })
}
