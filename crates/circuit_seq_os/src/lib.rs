#![forbid(unsafe_code)]

pub mod allocator;
pub mod error;
pub mod submission;

pub use allocator::{AllocationError, CapacityAllocator};
pub use error::ServiceError;
pub use submission::{
    ReferenceDownload, SampleListing, SubmissionConfig, SubmissionOrchestrator, SubmissionOutcome,
    SubmitFailure, SubmitRejection, SubmitRequest,
};
