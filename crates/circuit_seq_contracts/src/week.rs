#![forbid(unsafe_code)]

use std::fmt;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

pub const MIN_ISO_YEAR: i32 = 1;
pub const MAX_ISO_YEAR: i32 = 9999;

/// ISO-8601 (year, week) pair that partitions submissions.
///
/// Field order matters: the derived `Ord` sorts by year first, then week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WeekBucket {
    iso_year: i32,
    iso_week: u32,
}

impl WeekBucket {
    pub fn new(iso_year: i32, iso_week: u32) -> Result<Self, ContractViolation> {
        let bucket = Self { iso_year, iso_week };
        bucket.validate()?;
        Ok(bucket)
    }

    pub fn iso_year(self) -> i32 {
        self.iso_year
    }

    pub fn iso_week(self) -> u32 {
        self.iso_week
    }

    /// Monday of this ISO week.
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_isoywd_opt(self.iso_year, self.iso_week, Weekday::Mon)
    }
}

impl Validate for WeekBucket {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.iso_year < MIN_ISO_YEAR || self.iso_year > MAX_ISO_YEAR {
            return Err(ContractViolation::InvalidRange {
                field: "week_bucket.iso_year",
                min: MIN_ISO_YEAR as u64,
                max: MAX_ISO_YEAR as u64,
                got: self.iso_year.max(0) as u64,
            });
        }
        if self.iso_week == 0 || self.iso_week > 53 {
            return Err(ContractViolation::InvalidRange {
                field: "week_bucket.iso_week",
                min: 1,
                max: 53,
                got: self.iso_week as u64,
            });
        }
        // Week 53 only exists in long ISO years.
        if self.first_day().is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "week_bucket.iso_week",
                reason: "week does not exist in this ISO year",
            });
        }
        Ok(())
    }
}

impl fmt::Display for WeekBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-W{:02}", self.iso_year, self.iso_week)
    }
}
