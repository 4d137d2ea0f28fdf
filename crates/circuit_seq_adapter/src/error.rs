#![forbid(unsafe_code)]

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_contracts::{ContractViolation, ReasonCodeId};
use circuit_seq_os::submission::reason_codes;
use circuit_seq_os::{ServiceError, SubmitFailure, SubmitRejection};
use serde::Serialize;
use thiserror::Error;

pub mod adapter_reason_codes {
    use circuit_seq_contracts::ReasonCodeId;

    // HTTP adapter reason-code namespace ("AD").
    pub const MISSING_IDENTITY: ReasonCodeId = ReasonCodeId(0x4144_0001);
    pub const FORBIDDEN: ReasonCodeId = ReasonCodeId(0x4144_0002);
    pub const MALFORMED_PAYLOAD: ReasonCodeId = ReasonCodeId(0x4144_0003);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("missing caller identity")]
    MissingIdentity,

    #[error("administrator access required")]
    Forbidden,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid input: {0}")]
    InvalidInput(ContractViolation),

    /// Request body exceeded the configured upload ceiling.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("no more samples available this week ({committed}/{capacity} in {week})")]
    CapacityExceeded {
        week: WeekBucket,
        capacity: u32,
        committed: u32,
    },

    #[error("sample {key} not found")]
    SampleNotFound { key: String },

    #[error("sample {key} has no reference sequence")]
    NoReferenceSequence { key: String },

    #[error("sample {key} already has a reference sequence")]
    ReferenceAlreadyStored { key: String },

    /// The sample (if any) is committed; only the file step failed.
    #[error("storage failure: {reason}")]
    StorageFailure {
        primary_key: Option<String>,
        reason: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub status: String,
    pub outcome: String,
    pub reason_code: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
}

impl AdapterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdapterError::MissingIdentity => StatusCode::UNAUTHORIZED,
            AdapterError::Forbidden => StatusCode::FORBIDDEN,
            AdapterError::MalformedPayload(_) | AdapterError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            AdapterError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AdapterError::CapacityExceeded { .. } | AdapterError::ReferenceAlreadyStored { .. } => {
                StatusCode::CONFLICT
            }
            AdapterError::SampleNotFound { .. } | AdapterError::NoReferenceSequence { .. } => {
                StatusCode::NOT_FOUND
            }
            AdapterError::StorageFailure { .. } | AdapterError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            AdapterError::MissingIdentity => "UNAUTHENTICATED",
            AdapterError::Forbidden => "FORBIDDEN",
            AdapterError::MalformedPayload(_)
            | AdapterError::InvalidInput(_)
            | AdapterError::PayloadTooLarge(_) => "INVALID_INPUT",
            AdapterError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            AdapterError::SampleNotFound { .. } => "SAMPLE_NOT_FOUND",
            AdapterError::NoReferenceSequence { .. } => "NO_REFERENCE_SEQUENCE",
            AdapterError::ReferenceAlreadyStored { .. } => "REFERENCE_ALREADY_STORED",
            AdapterError::StorageFailure { .. } => "STORAGE_FAILURE",
            AdapterError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            AdapterError::MissingIdentity => adapter_reason_codes::MISSING_IDENTITY,
            AdapterError::Forbidden => adapter_reason_codes::FORBIDDEN,
            AdapterError::MalformedPayload(_) => adapter_reason_codes::MALFORMED_PAYLOAD,
            AdapterError::InvalidInput(_) | AdapterError::PayloadTooLarge(_) => {
                reason_codes::SUBMIT_INVALID_INPUT
            }
            AdapterError::CapacityExceeded { .. } => reason_codes::SUBMIT_CAPACITY_EXCEEDED,
            AdapterError::SampleNotFound { .. } => reason_codes::SAMPLE_NOT_FOUND,
            AdapterError::NoReferenceSequence { .. } => reason_codes::NO_REFERENCE_SEQUENCE,
            AdapterError::ReferenceAlreadyStored { .. } => reason_codes::REFERENCE_ALREADY_STORED,
            AdapterError::StorageFailure { .. } => reason_codes::SUBMIT_STORAGE_FAILURE,
            AdapterError::Internal(_) => reason_codes::SUBMIT_INTERNAL_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let primary_key = match self {
            AdapterError::StorageFailure { primary_key, .. } => primary_key.clone(),
            _ => None,
        };
        ErrorBody {
            status: "error".to_string(),
            outcome: self.outcome().to_string(),
            reason_code: self.reason_code().as_hex(),
            reason: self.to_string(),
            primary_key,
        }
    }
}

impl From<ServiceError> for AdapterError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(v) => AdapterError::InvalidInput(v),
            ServiceError::SampleNotFound { key } => AdapterError::SampleNotFound { key },
            ServiceError::NoReferenceSequence { key } => AdapterError::NoReferenceSequence { key },
            ServiceError::ReferenceAlreadyStored { key } => {
                AdapterError::ReferenceAlreadyStored { key }
            }
            ServiceError::StorageFailure { reason } => AdapterError::StorageFailure {
                primary_key: None,
                reason,
            },
            ServiceError::Internal { reason } => AdapterError::Internal(reason),
        }
    }
}

impl From<SubmitRejection> for AdapterError {
    fn from(rejection: SubmitRejection) -> Self {
        match rejection {
            SubmitRejection::InvalidInput(v) => AdapterError::InvalidInput(v),
            SubmitRejection::CapacityExceeded {
                week,
                capacity,
                committed,
            } => AdapterError::CapacityExceeded {
                week,
                capacity,
                committed,
            },
        }
    }
}

impl From<SubmitFailure> for AdapterError {
    fn from(failure: SubmitFailure) -> Self {
        match failure {
            SubmitFailure::StorageFailure { sample, reason } => AdapterError::StorageFailure {
                primary_key: Some(sample.primary_key.to_string()),
                reason,
            },
            SubmitFailure::Internal { reason } => AdapterError::Internal(reason),
        }
    }
}

impl From<JsonRejection> for AdapterError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AdapterError::PayloadTooLarge(rejection.body_text())
        } else {
            AdapterError::MalformedPayload(rejection.body_text())
        }
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
