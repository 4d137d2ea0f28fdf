#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::OwnerId;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const SETTINGS_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const MAX_PLATE_ROWS: u32 = 32;
pub const MAX_PLATE_COLS: u32 = 48;
/// Upper bound on rows x cols so every ordinal fits the three-digit key field.
pub const MAX_WEEKLY_CAPACITY: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettingsVersion(pub u64);

impl SettingsVersion {
    pub const FIRST: SettingsVersion = SettingsVersion(1);

    pub fn next(self) -> SettingsVersion {
        SettingsVersion(self.0.saturating_add(1))
    }
}

impl Validate for SettingsVersion {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "settings_version",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// One immutable version of the plate geometry.
///
/// A change of geometry is a new version; a version that may already have
/// been used for allocation is never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateSettings {
    pub schema_version: SchemaVersion,
    pub version: SettingsVersion,
    pub plate_rows: u32,
    pub plate_cols: u32,
    pub updated_by: OwnerId,
    pub updated_at: DateTime<Utc>,
}

impl PlateSettings {
    pub fn v1(
        version: SettingsVersion,
        plate_rows: u32,
        plate_cols: u32,
        updated_by: OwnerId,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let settings = Self {
            schema_version: SETTINGS_CONTRACT_VERSION,
            version,
            plate_rows,
            plate_cols,
            updated_by,
            updated_at,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Weekly capacity, rows x cols.
    pub fn capacity(&self) -> u32 {
        self.plate_rows.saturating_mul(self.plate_cols)
    }
}

impl Validate for PlateSettings {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != SETTINGS_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "plate_settings.schema_version",
                reason: "must match SETTINGS_CONTRACT_VERSION",
            });
        }
        self.version.validate()?;
        self.updated_by.validate()?;
        if self.plate_rows == 0 || self.plate_rows > MAX_PLATE_ROWS {
            return Err(ContractViolation::InvalidRange {
                field: "plate_settings.plate_rows",
                min: 1,
                max: MAX_PLATE_ROWS as u64,
                got: self.plate_rows as u64,
            });
        }
        if self.plate_cols == 0 || self.plate_cols > MAX_PLATE_COLS {
            return Err(ContractViolation::InvalidRange {
                field: "plate_settings.plate_cols",
                min: 1,
                max: MAX_PLATE_COLS as u64,
                got: self.plate_cols as u64,
            });
        }
        let capacity = self.capacity();
        if capacity == 0 || capacity > MAX_WEEKLY_CAPACITY {
            return Err(ContractViolation::InvalidRange {
                field: "plate_settings.capacity",
                min: 1,
                max: MAX_WEEKLY_CAPACITY as u64,
                got: capacity as u64,
            });
        }
        Ok(())
    }
}
