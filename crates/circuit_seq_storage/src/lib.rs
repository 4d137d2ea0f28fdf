#![forbid(unsafe_code)]

pub mod journal;
pub mod reference;
pub mod repo;
pub mod store;

pub use reference::{FsReferenceStore, ReferenceFileStore, ReferenceStoreError};
pub use repo::{SampleRepo, SettingsRepo};
pub use store::{CircuitSeqStore, SampleTables, StorageError};
