#![forbid(unsafe_code)]

pub mod common;
pub mod sample;
pub mod settings;
pub mod week;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};
