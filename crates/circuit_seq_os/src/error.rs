#![forbid(unsafe_code)]

use circuit_seq_contracts::{ContractViolation, ReasonCodeId};
use circuit_seq_storage::{ReferenceStoreError, StorageError};

use crate::submission::reason_codes;

/// Failures of the read and upload-only paths around submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ContractViolation),
    #[error("sample {key} not found")]
    SampleNotFound { key: String },
    #[error("sample {key} has no reference sequence")]
    NoReferenceSequence { key: String },
    #[error("sample {key} already has a reference sequence")]
    ReferenceAlreadyStored { key: String },
    #[error("storage failure: {reason}")]
    StorageFailure { reason: String },
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl ServiceError {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            ServiceError::InvalidInput(_) => reason_codes::SUBMIT_INVALID_INPUT,
            ServiceError::SampleNotFound { .. } => reason_codes::SAMPLE_NOT_FOUND,
            ServiceError::NoReferenceSequence { .. } => reason_codes::NO_REFERENCE_SEQUENCE,
            ServiceError::ReferenceAlreadyStored { .. } => reason_codes::REFERENCE_ALREADY_STORED,
            ServiceError::StorageFailure { .. } => reason_codes::SUBMIT_STORAGE_FAILURE,
            ServiceError::Internal { .. } => reason_codes::SUBMIT_INTERNAL_ERROR,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ContractViolation(v) => ServiceError::InvalidInput(v),
            StorageError::ReferenceAlreadyAttached { key } => {
                ServiceError::ReferenceAlreadyStored { key }
            }
            StorageError::LockPoisoned | StorageError::InconsistentRow { .. } => {
                ServiceError::Internal {
                    reason: err.to_string(),
                }
            }
            other => ServiceError::StorageFailure {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ReferenceStoreError> for ServiceError {
    fn from(err: ReferenceStoreError) -> Self {
        ServiceError::StorageFailure {
            reason: err.to_string(),
        }
    }
}
