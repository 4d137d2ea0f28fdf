#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use circuit_seq_contracts::sample::{
    OwnerId, ReferenceAttachment, ReferenceUpload, SampleKey, SampleName, SampleOrdinal,
    SampleRecord,
};
use circuit_seq_contracts::settings::PlateSettings;
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_contracts::{ContractViolation, ReasonCodeId};
use circuit_seq_engines::{capacity, identifier, reference, week};
use circuit_seq_storage::{
    ReferenceFileStore, ReferenceStoreError, SampleRepo, SettingsRepo, StorageError,
};
use tracing::{debug, error, info, warn};

use crate::allocator::{AllocationError, CapacityAllocator};
use crate::error::ServiceError;

pub mod reason_codes {
    use circuit_seq_contracts::ReasonCodeId;

    // Submission reason-code namespace ("SE").
    pub const SUBMIT_ACCEPTED: ReasonCodeId = ReasonCodeId(0x5345_0001);
    pub const SUBMIT_INVALID_INPUT: ReasonCodeId = ReasonCodeId(0x5345_0010);
    pub const SUBMIT_CAPACITY_EXCEEDED: ReasonCodeId = ReasonCodeId(0x5345_0011);
    pub const SUBMIT_STORAGE_FAILURE: ReasonCodeId = ReasonCodeId(0x5345_0020);
    pub const SAMPLE_NOT_FOUND: ReasonCodeId = ReasonCodeId(0x5345_0030);
    pub const NO_REFERENCE_SEQUENCE: ReasonCodeId = ReasonCodeId(0x5345_0031);
    pub const REFERENCE_ALREADY_STORED: ReasonCodeId = ReasonCodeId(0x5345_0032);
    pub const SUBMIT_INTERNAL_ERROR: ReasonCodeId = ReasonCodeId(0x5345_00F1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionConfig {
    pub max_upload_bytes: usize,
    /// Extra reservations attempted after a storage uniqueness conflict.
    pub conflict_retries: u8,
}

impl SubmissionConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_upload_bytes: 64_000_000,
            conflict_retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub owner: String,
    pub name: String,
    pub file_name: Option<String>,
    pub file_bytes: Option<Vec<u8>>,
    pub now: DateTime<Utc>,
}

impl SubmitRequest {
    pub fn metadata_only(owner: &str, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            file_name: None,
            file_bytes: None,
            now,
        }
    }

    pub fn with_reference(mut self, file_name: Option<&str>, bytes: Vec<u8>) -> Self {
        self.file_name = file_name.map(str::to_string);
        self.file_bytes = Some(bytes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRejection {
    InvalidInput(ContractViolation),
    CapacityExceeded {
        week: WeekBucket,
        capacity: u32,
        committed: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitFailure {
    /// Metadata is committed and the slot consumed; only the upload failed.
    StorageFailure {
        sample: Box<SampleRecord>,
        reason: String,
    },
    Internal { reason: String },
}

/// Terminal state of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted(SampleRecord),
    Rejected(SubmitRejection),
    Failed(SubmitFailure),
}

impl SubmissionOutcome {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            SubmissionOutcome::Accepted(_) => reason_codes::SUBMIT_ACCEPTED,
            SubmissionOutcome::Rejected(SubmitRejection::InvalidInput(_)) => {
                reason_codes::SUBMIT_INVALID_INPUT
            }
            SubmissionOutcome::Rejected(SubmitRejection::CapacityExceeded { .. }) => {
                reason_codes::SUBMIT_CAPACITY_EXCEEDED
            }
            SubmissionOutcome::Failed(SubmitFailure::StorageFailure { .. }) => {
                reason_codes::SUBMIT_STORAGE_FAILURE
            }
            SubmissionOutcome::Failed(SubmitFailure::Internal { .. }) => {
                reason_codes::SUBMIT_INTERNAL_ERROR
            }
        }
    }

    pub fn accepted(&self) -> Option<&SampleRecord> {
        match self {
            SubmissionOutcome::Accepted(record) => Some(record),
            _ => None,
        }
    }
}

/// Samples split at the start of the current ISO week, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleListing {
    pub current: Vec<SampleRecord>,
    pub previous: Vec<SampleRecord>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ReferenceDownload {
    pub file_name: String,
    pub description: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ReferenceDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceDownload")
            .field("file_name", &self.file_name)
            .field("description", &self.description)
            .field("byte_len", &self.bytes.len())
            .finish()
    }
}

struct PreparedReference {
    upload: ReferenceUpload,
    attachment: ReferenceAttachment,
}

struct ValidatedSubmission {
    owner: OwnerId,
    name: SampleName,
    now: DateTime<Utc>,
    week: WeekBucket,
    reference: Option<PreparedReference>,
}

/// Composes week partitioning, weekly admission, key generation, the sample
/// repository and the reference file store.
///
/// `submit` is the only entry point that consumes capacity. Every other
/// operation reads, or touches an already committed sample.
pub struct SubmissionOrchestrator<R, F>
where
    R: SampleRepo + SettingsRepo,
    F: ReferenceFileStore,
{
    repo: R,
    files: F,
    allocator: CapacityAllocator,
    config: SubmissionConfig,
}

impl<R, F> SubmissionOrchestrator<R, F>
where
    R: SampleRepo + SettingsRepo,
    F: ReferenceFileStore,
{
    pub fn new(repo: R, files: F, config: SubmissionConfig) -> Self {
        Self {
            repo,
            files,
            allocator: CapacityAllocator::new(),
            config,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn files(&self) -> &F {
        &self.files
    }

    pub fn config(&self) -> SubmissionConfig {
        self.config
    }

    pub fn submit(&self, req: SubmitRequest) -> SubmissionOutcome {
        let v = match self.validate(req) {
            Ok(v) => v,
            Err(violation) => {
                info!(field = violation.field(), %violation, "submission rejected: invalid input");
                return SubmissionOutcome::Rejected(SubmitRejection::InvalidInput(violation));
            }
        };
        debug!(owner = %v.owner, week = %v.week, name = %v.name, "submission validated");

        let record = match self.reserve_and_commit(&v) {
            Ok(record) => record,
            Err(outcome) => return outcome,
        };
        info!(
            owner = %record.owner,
            week = %record.week_bucket,
            ordinal = record.ordinal.get(),
            primary_key = %record.primary_key,
            "sample committed"
        );

        let Some(prepared) = v.reference else {
            return SubmissionOutcome::Accepted(record);
        };
        match self.store_and_attach(&record, &prepared) {
            Ok(updated) => {
                info!(primary_key = %updated.primary_key, byte_len = prepared.upload.bytes.len(), "reference stored");
                SubmissionOutcome::Accepted(updated)
            }
            Err(err) => {
                warn!(primary_key = %record.primary_key, error = %err, "reference upload failed after commit");
                SubmissionOutcome::Failed(SubmitFailure::StorageFailure {
                    sample: Box::new(record),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Slots left in the week holding `now`. Never negative.
    pub fn remaining_this_week(&self, now: DateTime<Utc>) -> Result<u32, ServiceError> {
        let bucket = week::bucket_for(now)?;
        let settings = self.repo.current_settings()?;
        let committed = self.repo.count_in_week(bucket)?;
        Ok(capacity::remaining(committed, &settings))
    }

    /// Stores the reference file for a committed sample that has none yet.
    /// Never reserves a slot.
    pub fn upload_reference(
        &self,
        owner: &str,
        primary_key: &str,
        file_name: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<SampleRecord, ServiceError> {
        let owner = OwnerId::new(owner)?;
        let key = lookup_key(primary_key)?;
        let prepared = self.prepare_reference(file_name.map(str::to_string), bytes)?;

        let row = self
            .repo
            .sample_row(&key)?
            .filter(|r| r.owner == owner)
            .ok_or_else(|| ServiceError::SampleNotFound {
                key: key.to_string(),
            })?;
        if row.has_reference_sequence() {
            return Err(ServiceError::ReferenceAlreadyStored {
                key: key.to_string(),
            });
        }
        let updated = self.store_and_attach(&row, &prepared)?;
        info!(primary_key = %updated.primary_key, "reference stored on retry");
        Ok(updated)
    }

    pub fn samples_for_owner(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<SampleListing, ServiceError> {
        let owner = OwnerId::new(owner)?;
        let rows = self.repo.samples_for_owner(&owner, None)?;
        split_listing(rows, now)
    }

    pub fn all_samples(&self, now: DateTime<Utc>) -> Result<SampleListing, ServiceError> {
        split_listing(self.repo.all_samples(None)?, now)
    }

    /// Reads a stored reference back. Non-admin viewers only see their own
    /// samples; anything else reports as not found.
    pub fn fetch_reference(
        &self,
        viewer: &str,
        primary_key: &str,
        is_admin: bool,
    ) -> Result<ReferenceDownload, ServiceError> {
        let viewer = OwnerId::new(viewer)?;
        let key = lookup_key(primary_key)?;
        let row = self
            .repo
            .sample_row(&key)?
            .filter(|r| is_admin || r.owner == viewer)
            .ok_or_else(|| ServiceError::SampleNotFound {
                key: key.to_string(),
            })?;
        let attachment = row
            .reference
            .clone()
            .ok_or_else(|| ServiceError::NoReferenceSequence {
                key: key.to_string(),
            })?;

        let bytes = self.files.fetch(&row).map_err(|err| {
            error!(primary_key = %key, error = %err, "reference flagged but unreadable");
            ServiceError::from(err)
        })?;
        if reference::sha256_hex(&bytes) != attachment.sha256_hex {
            let err = ReferenceStoreError::DigestMismatch {
                path: self.files.path_for(&row),
            };
            error!(primary_key = %key, error = %err, "reference digest mismatch");
            return Err(err.into());
        }
        Ok(ReferenceDownload {
            file_name: format!("{}_{}.fasta", row.primary_key, row.name),
            description: attachment.description,
            bytes,
        })
    }

    pub fn current_settings(&self) -> Result<Arc<PlateSettings>, ServiceError> {
        Ok(self.repo.current_settings()?)
    }

    pub fn settings_history(&self) -> Result<Vec<Arc<PlateSettings>>, ServiceError> {
        Ok(self.repo.settings_history()?)
    }

    /// Appends a new settings version. Takes effect for the next reservation
    /// of any week, the current one included.
    pub fn update_settings(
        &self,
        admin: &str,
        plate_rows: u32,
        plate_cols: u32,
        now: DateTime<Utc>,
    ) -> Result<Arc<PlateSettings>, ServiceError> {
        let admin = OwnerId::new(admin)?;
        Ok(self
            .repo
            .apply_settings(plate_rows, plate_cols, admin, now)?)
    }

    /// Current settings, seeding the first version when none exist yet.
    pub fn ensure_settings(
        &self,
        plate_rows: u32,
        plate_cols: u32,
        seeded_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<PlateSettings>, ServiceError> {
        match self.repo.current_settings() {
            Ok(settings) => Ok(settings),
            Err(StorageError::NotFound { .. }) => {
                info!(plate_rows, plate_cols, "seeding initial plate settings");
                self.update_settings(seeded_by, plate_rows, plate_cols, now)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn validate(&self, req: SubmitRequest) -> Result<ValidatedSubmission, ContractViolation> {
        let owner = OwnerId::new(req.owner)?;
        let name = SampleName::new(req.name)?;
        let week = week::bucket_for(req.now)?;
        let reference = match req.file_bytes {
            Some(bytes) => Some(self.prepare_reference(req.file_name, bytes)?),
            None => None,
        };
        Ok(ValidatedSubmission {
            owner,
            name,
            now: req.now,
            week,
            reference,
        })
    }

    fn prepare_reference(
        &self,
        file_name: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<PreparedReference, ContractViolation> {
        if bytes.len() > self.config.max_upload_bytes {
            return Err(ContractViolation::InvalidRange {
                field: "reference_upload.bytes",
                min: 1,
                max: self.config.max_upload_bytes as u64,
                got: bytes.len() as u64,
            });
        }
        let upload = ReferenceUpload::new(file_name, bytes)?;
        let attachment = reference::attachment_for(&upload)?;
        Ok(PreparedReference { upload, attachment })
    }

    fn reserve_and_commit(
        &self,
        v: &ValidatedSubmission,
    ) -> Result<SampleRecord, SubmissionOutcome> {
        let mut retries_left = self.config.conflict_retries;
        loop {
            // Re-read on every attempt so a settings change applies at once.
            let settings = self.repo.current_settings().map_err(|err| {
                error!(error = %err, "no plate settings in force");
                internal(err.to_string())
            })?;
            match self
                .allocator
                .try_reserve_slot(&self.repo, v.week, &settings, |ordinal| {
                    self.commit_row(v, ordinal)
                }) {
                Ok(record) => return Ok(record),
                Err(AllocationError::CapacityExceeded {
                    week,
                    capacity,
                    committed,
                }) => {
                    info!(owner = %v.owner, %week, capacity, committed, "submission rejected: capacity exceeded");
                    return Err(SubmissionOutcome::Rejected(
                        SubmitRejection::CapacityExceeded {
                            week,
                            capacity,
                            committed,
                        },
                    ));
                }
                Err(AllocationError::Storage(err))
                    if err.is_uniqueness_conflict() && retries_left > 0 =>
                {
                    retries_left -= 1;
                    warn!(owner = %v.owner, week = %v.week, error = %err, "uniqueness conflict on commit, retrying reservation");
                }
                Err(AllocationError::Storage(StorageError::ContractViolation(violation))) => {
                    info!(field = violation.field(), %violation, "submission rejected: invalid input");
                    return Err(SubmissionOutcome::Rejected(
                        SubmitRejection::InvalidInput(violation),
                    ));
                }
                Err(err) => {
                    error!(owner = %v.owner, week = %v.week, error = %err, "submission failed");
                    return Err(internal(err.to_string()));
                }
            }
        }
    }

    fn commit_row(
        &self,
        v: &ValidatedSubmission,
        ordinal: SampleOrdinal,
    ) -> Result<SampleRecord, StorageError> {
        let record = SampleRecord::v1(
            identifier::generate(v.week, ordinal)?,
            v.owner.clone(),
            v.name.clone(),
            v.now,
            v.week,
            ordinal,
        )?;
        self.repo.insert_sample(record.clone())?;
        Ok(record)
    }

    fn store_and_attach(
        &self,
        record: &SampleRecord,
        prepared: &PreparedReference,
    ) -> Result<SampleRecord, ServiceError> {
        match self.files.store(record, &prepared.upload.bytes) {
            Ok(_) => {}
            Err(ReferenceStoreError::AlreadyExists(path)) => {
                // Left behind by an earlier attempt whose attach never landed.
                let existing = self.files.fetch(record)?;
                if reference::sha256_hex(&existing) != prepared.attachment.sha256_hex {
                    error!(path = %path.display(), primary_key = %record.primary_key, "reference file collision");
                    return Err(ReferenceStoreError::AlreadyExists(path).into());
                }
                debug!(path = %path.display(), "identical reference already on disk");
            }
            Err(err) => return Err(err.into()),
        }

        match self
            .repo
            .attach_reference(&record.primary_key, prepared.attachment.clone())
        {
            Ok(updated) => Ok(updated),
            Err(err @ StorageError::ReferenceAlreadyAttached { .. }) => Err(err.into()),
            Err(err) => {
                if let Err(cleanup) = self.files.remove(record) {
                    warn!(primary_key = %record.primary_key, error = %cleanup, "orphan reference file left on disk");
                }
                Err(err.into())
            }
        }
    }
}

fn internal(reason: String) -> SubmissionOutcome {
    SubmissionOutcome::Failed(SubmitFailure::Internal { reason })
}

// A key that names no real (week, ordinal) is bad input, not a missing sample.
fn lookup_key(primary_key: &str) -> Result<SampleKey, ServiceError> {
    let key = SampleKey::new(primary_key)?;
    identifier::parse(&key)?;
    Ok(key)
}

fn split_listing(
    mut rows: Vec<SampleRecord>,
    now: DateTime<Utc>,
) -> Result<SampleListing, ServiceError> {
    let week_start = week::bounds_of(week::bucket_for(now)?)?.start;
    rows.sort_by(|a, b| {
        b.submitted_at
            .cmp(&a.submitted_at)
            .then_with(|| b.primary_key.cmp(&a.primary_key))
    });
    let (current, previous) = rows
        .into_iter()
        .partition(|r| r.submitted_at >= week_start);
    Ok(SampleListing { current, previous })
}
