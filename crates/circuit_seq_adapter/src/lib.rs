#![forbid(unsafe_code)]

//! HTTP surface of the weekly sample allocator.
//!
//! Authentication happens upstream; the adapter trusts the identity headers
//! it is handed and only maps requests and outcomes.

pub mod config;
pub mod error;
pub mod routes;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use circuit_seq_contracts::sample::SampleRecord;
use circuit_seq_contracts::settings::PlateSettings;
use circuit_seq_os::{
    ReferenceDownload, SampleListing, SubmissionConfig, SubmissionOrchestrator, SubmissionOutcome,
    SubmitRequest,
};
use circuit_seq_storage::{CircuitSeqStore, FsReferenceStore};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use config::AdapterConfig;
pub use error::AdapterError;
pub use routes::router;

/// Identity used when the first settings version is seeded at startup.
pub const BOOTSTRAP_IDENTITY: &str = "circuit_seq_bootstrap";

/// Room for the JSON envelope around an encoded upload.
pub const JSON_ENVELOPE_BYTES: usize = 64 * 1024;

/// Largest request body that still carries an upload of `max_upload_bytes`
/// once it is base64 encoded.
pub fn request_body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(JSON_ENVELOPE_BYTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleView {
    pub primary_key: String,
    pub owner: String,
    pub name: String,
    pub submitted_at: DateTime<Utc>,
    pub week: String,
    pub ordinal: u32,
    pub has_reference_sequence: bool,
    pub reference_sequence_description: Option<String>,
}

impl From<&SampleRecord> for SampleView {
    fn from(r: &SampleRecord) -> Self {
        Self {
            primary_key: r.primary_key.to_string(),
            owner: r.owner.to_string(),
            name: r.name.to_string(),
            submitted_at: r.submitted_at,
            week: r.week_bucket.to_string(),
            ordinal: r.ordinal.get(),
            has_reference_sequence: r.has_reference_sequence(),
            reference_sequence_description: r.reference_sequence_description().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleListingResponse {
    pub current: Vec<SampleView>,
    pub previous: Vec<SampleView>,
}

impl From<&SampleListing> for SampleListingResponse {
    fn from(l: &SampleListing) -> Self {
        Self {
            current: l.current.iter().map(SampleView::from).collect(),
            previous: l.previous.iter().map(SampleView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingResponse {
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSampleRequest {
    pub name: String,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Reference sequence bytes, standard base64.
    #[serde(default)]
    pub file_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAcceptedResponse {
    pub status: String,
    pub outcome: String,
    pub reason_code: String,
    pub sample: SampleView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReferenceRequest {
    pub primary_key: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub file_base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceQuery {
    pub primary_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsView {
    pub version: u64,
    pub plate_rows: u32,
    pub plate_cols: u32,
    pub capacity: u32,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&PlateSettings> for SettingsView {
    fn from(s: &PlateSettings) -> Self {
        Self {
            version: s.version.0,
            plate_rows: s.plate_rows,
            plate_cols: s.plate_cols,
            capacity: s.capacity(),
            updated_by: s.updated_by.to_string(),
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettingsRequest {
    pub plate_rows: u32,
    pub plate_cols: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub settings_version: u64,
    pub capacity: u32,
}

/// Caller identity as asserted by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub owner: String,
    pub is_admin: bool,
}

pub struct AdapterRuntime {
    orchestrator: SubmissionOrchestrator<CircuitSeqStore, FsReferenceStore>,
}

impl AdapterRuntime {
    /// Opens the journal, replays it, and seeds settings if none exist yet.
    pub fn open(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let store = CircuitSeqStore::open_with_journal(&config.store_path)
            .map_err(|err| AdapterError::Internal(err.to_string()))?;
        let orchestrator = SubmissionOrchestrator::new(
            store,
            FsReferenceStore::new(&config.data_root),
            SubmissionConfig {
                max_upload_bytes: config.max_upload_bytes,
                ..SubmissionConfig::mvp_v1()
            },
        );
        let settings = orchestrator.ensure_settings(
            config.plate_rows,
            config.plate_cols,
            BOOTSTRAP_IDENTITY,
            Utc::now(),
        )?;
        info!(
            store_path = %config.store_path.display(),
            data_root = %config.data_root.display(),
            settings_version = settings.version.0,
            capacity = settings.capacity(),
            "adapter runtime ready"
        );
        Ok(Self { orchestrator })
    }

    pub fn request_body_limit(&self) -> usize {
        request_body_limit(self.orchestrator.config().max_upload_bytes)
    }

    pub fn default_from_env() -> Result<Self, AdapterError> {
        Self::open(&AdapterConfig::from_env())
    }

    pub fn health(&self) -> Result<HealthResponse, AdapterError> {
        let settings = self.orchestrator.current_settings()?;
        Ok(HealthResponse {
            status: "ok".to_string(),
            settings_version: settings.version.0,
            capacity: settings.capacity(),
        })
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Result<RemainingResponse, AdapterError> {
        Ok(RemainingResponse {
            remaining: self.orchestrator.remaining_this_week(now)?,
        })
    }

    pub fn samples(
        &self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<SampleListingResponse, AdapterError> {
        let listing = self.orchestrator.samples_for_owner(&caller.owner, now)?;
        Ok(SampleListingResponse::from(&listing))
    }

    pub fn all_samples(
        &self,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> Result<SampleListingResponse, AdapterError> {
        require_admin(caller)?;
        let listing = self.orchestrator.all_samples(now)?;
        Ok(SampleListingResponse::from(&listing))
    }

    pub fn add_sample(
        &self,
        caller: &Caller,
        request: AddSampleRequest,
        now: DateTime<Utc>,
    ) -> Result<SampleAcceptedResponse, AdapterError> {
        let file_bytes = request
            .file_base64
            .as_deref()
            .map(decode_base64)
            .transpose()?;
        let outcome = self.orchestrator.submit(SubmitRequest {
            owner: caller.owner.clone(),
            name: request.name,
            file_name: request.file_name,
            file_bytes,
            now,
        });
        let reason_code = outcome.reason_code().as_hex();
        match outcome {
            SubmissionOutcome::Accepted(record) => Ok(SampleAcceptedResponse {
                status: "ok".to_string(),
                outcome: "ACCEPTED".to_string(),
                reason_code,
                sample: SampleView::from(&record),
            }),
            SubmissionOutcome::Rejected(rejection) => Err(rejection.into()),
            SubmissionOutcome::Failed(failure) => Err(failure.into()),
        }
    }

    pub fn upload_reference(
        &self,
        caller: &Caller,
        request: UploadReferenceRequest,
    ) -> Result<SampleView, AdapterError> {
        let bytes = decode_base64(&request.file_base64)?;
        let record = self.orchestrator.upload_reference(
            &caller.owner,
            &request.primary_key,
            request.file_name.as_deref(),
            bytes,
        )?;
        Ok(SampleView::from(&record))
    }

    pub fn download_reference(
        &self,
        caller: &Caller,
        primary_key: &str,
    ) -> Result<ReferenceDownload, AdapterError> {
        Ok(self
            .orchestrator
            .fetch_reference(&caller.owner, primary_key, caller.is_admin)?)
    }

    pub fn settings(&self, caller: &Caller) -> Result<Vec<SettingsView>, AdapterError> {
        require_admin(caller)?;
        Ok(self
            .orchestrator
            .settings_history()?
            .iter()
            .rev()
            .map(|s| SettingsView::from(s.as_ref()))
            .collect())
    }

    pub fn update_settings(
        &self,
        caller: &Caller,
        request: UpdateSettingsRequest,
        now: DateTime<Utc>,
    ) -> Result<SettingsView, AdapterError> {
        require_admin(caller)?;
        let applied = self.orchestrator.update_settings(
            &caller.owner,
            request.plate_rows,
            request.plate_cols,
            now,
        )?;
        Ok(SettingsView::from(applied.as_ref()))
    }
}

fn require_admin(caller: &Caller) -> Result<(), AdapterError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(AdapterError::Forbidden)
    }
}

fn decode_base64(raw: &str) -> Result<Vec<u8>, AdapterError> {
    BASE64
        .decode(raw.trim())
        .map_err(|err| AdapterError::MalformedPayload(format!("file_base64: {err}")))
}
