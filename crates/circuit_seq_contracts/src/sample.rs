#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::settings::MAX_WEEKLY_CAPACITY;
use crate::week::WeekBucket;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const SAMPLE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const OWNER_ID_MAX_LEN: usize = 254;
pub const SAMPLE_NAME_MAX_LEN: usize = 64;
pub const SAMPLE_KEY_LEN: usize = 11;
pub const REFERENCE_FILE_NAME_MAX_LEN: usize = 255;
pub const REFERENCE_DESCRIPTION_MAX_LEN: usize = 256;

/// Already-authenticated submitter identity (the account email).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for OwnerId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("owner_id", &self.0, OWNER_ID_MAX_LEN)?;
        if self.0.chars().any(char::is_whitespace) {
            return Err(ContractViolation::InvalidValue {
                field: "owner_id",
                reason: "must not contain whitespace",
            });
        }
        Ok(())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User-chosen sample name. It becomes part of the reference file name,
/// so path separators and leading dots are refused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleName(String);

impl SampleName {
    pub fn new(name: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(name.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SampleName {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("sample_name", &self.0, SAMPLE_NAME_MAX_LEN)?;
        if self.0.contains(['/', '\\']) {
            return Err(ContractViolation::InvalidValue {
                field: "sample_name",
                reason: "must not contain path separators",
            });
        }
        if self.0.starts_with('.') {
            return Err(ContractViolation::InvalidValue {
                field: "sample_name",
                reason: "must not start with '.'",
            });
        }
        Ok(())
    }
}

impl fmt::Display for SampleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1-based position of a sample within its week bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleOrdinal(u32);

impl SampleOrdinal {
    pub const FIRST: SampleOrdinal = SampleOrdinal(1);

    pub fn new(value: u32) -> Result<Self, ContractViolation> {
        let v = Self(value);
        v.validate()?;
        Ok(v)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Validate for SampleOrdinal {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0 == 0 || self.0 > MAX_WEEKLY_CAPACITY {
            return Err(ContractViolation::InvalidRange {
                field: "sample_ordinal",
                min: 1,
                max: MAX_WEEKLY_CAPACITY as u64,
                got: self.0 as u64,
            });
        }
        Ok(())
    }
}

/// Primary key of a sample, `YYYY-WW-NNN`.
///
/// Only the shape is checked here; the key generator owns the mapping
/// between keys and (week, ordinal).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleKey(String);

impl SampleKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(key.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SampleKey {
    fn validate(&self) -> Result<(), ContractViolation> {
        let bytes = self.0.as_bytes();
        if bytes.len() != SAMPLE_KEY_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "sample_key",
                reason: "must be exactly 11 chars (YYYY-WW-NNN)",
            });
        }
        let shape_ok = bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
        if !shape_ok {
            return Err(ContractViolation::InvalidValue {
                field: "sample_key",
                reason: "must match YYYY-WW-NNN",
            });
        }
        Ok(())
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw reference sequence as uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct ReferenceUpload {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl ReferenceUpload {
    pub fn new(file_name: Option<String>, bytes: Vec<u8>) -> Result<Self, ContractViolation> {
        let upload = Self { file_name, bytes };
        upload.validate()?;
        Ok(upload)
    }
}

impl fmt::Debug for ReferenceUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceUpload")
            .field("file_name", &self.file_name)
            .field("byte_len", &self.bytes.len())
            .finish()
    }
}

impl Validate for ReferenceUpload {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.bytes.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "reference_upload.bytes",
                reason: "must not be empty",
            });
        }
        if let Some(file_name) = &self.file_name {
            validate_text(
                "reference_upload.file_name",
                file_name,
                REFERENCE_FILE_NAME_MAX_LEN,
            )?;
        }
        Ok(())
    }
}

/// What the sample record remembers about its stored reference file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAttachment {
    pub description: String,
    pub sha256_hex: String,
    pub byte_len: u64,
}

impl ReferenceAttachment {
    pub fn v1(
        description: String,
        sha256_hex: String,
        byte_len: u64,
    ) -> Result<Self, ContractViolation> {
        let a = Self {
            description,
            sha256_hex,
            byte_len,
        };
        a.validate()?;
        Ok(a)
    }
}

impl Validate for ReferenceAttachment {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text(
            "reference_attachment.description",
            &self.description,
            REFERENCE_DESCRIPTION_MAX_LEN,
        )?;
        if self.sha256_hex.len() != 64
            || !self
                .sha256_hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ContractViolation::InvalidValue {
                field: "reference_attachment.sha256_hex",
                reason: "must be 64 lowercase hex chars",
            });
        }
        if self.byte_len == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "reference_attachment.byte_len",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub schema_version: SchemaVersion,
    pub primary_key: SampleKey,
    pub owner: OwnerId,
    pub name: SampleName,
    pub submitted_at: DateTime<Utc>,
    pub week_bucket: WeekBucket,
    pub ordinal: SampleOrdinal,
    pub reference: Option<ReferenceAttachment>,
}

impl SampleRecord {
    pub fn v1(
        primary_key: SampleKey,
        owner: OwnerId,
        name: SampleName,
        submitted_at: DateTime<Utc>,
        week_bucket: WeekBucket,
        ordinal: SampleOrdinal,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: SAMPLE_CONTRACT_VERSION,
            primary_key,
            owner,
            name,
            submitted_at,
            week_bucket,
            ordinal,
            reference: None,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn has_reference_sequence(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference_sequence_description(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.description.as_str())
    }
}

impl Validate for SampleRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != SAMPLE_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "sample_record.schema_version",
                reason: "must match SAMPLE_CONTRACT_VERSION",
            });
        }
        self.primary_key.validate()?;
        self.owner.validate()?;
        self.name.validate()?;
        self.week_bucket.validate()?;
        self.ordinal.validate()?;
        if let Some(reference) = &self.reference {
            reference.validate()?;
        }
        Ok(())
    }
}
