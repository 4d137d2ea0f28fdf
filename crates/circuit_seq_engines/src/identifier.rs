#![forbid(unsafe_code)]

//! Sample primary keys: `YYYY-WW-NNN`, zero padded.
//!
//! Fixed-width decimal fields make lexicographic order equal to
//! (year, week, ordinal) order, and the week is part of the key so keys are
//! unique across all weeks, not only within one.

use circuit_seq_contracts::sample::{SampleKey, SampleOrdinal};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_contracts::{ContractViolation, Validate};

pub fn generate(week: WeekBucket, ordinal: SampleOrdinal) -> Result<SampleKey, ContractViolation> {
    week.validate()?;
    ordinal.validate()?;
    SampleKey::new(format!(
        "{:04}-{:02}-{:03}",
        week.iso_year(),
        week.iso_week(),
        ordinal.get()
    ))
}

pub fn parse(key: &SampleKey) -> Result<(WeekBucket, SampleOrdinal), ContractViolation> {
    key.validate()?;
    let s = key.as_str();
    let field = |range: std::ops::Range<usize>| -> Result<u32, ContractViolation> {
        s[range]
            .parse::<u32>()
            .map_err(|_| ContractViolation::InvalidValue {
                field: "sample_key",
                reason: "must match YYYY-WW-NNN",
            })
    };
    let year = field(0..4)?;
    let week = field(5..7)?;
    let ordinal = field(8..11)?;
    Ok((
        WeekBucket::new(year as i32, week)?,
        SampleOrdinal::new(ordinal)?,
    ))
}
