#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use circuit_seq_contracts::sample::{OwnerId, ReferenceAttachment, SampleKey, SampleRecord};
use circuit_seq_contracts::settings::PlateSettings;
use circuit_seq_contracts::week::WeekBucket;

use crate::store::StorageError;

/// Typed repository interface for sample metadata rows.
///
/// `insert_sample` is the storage-level enforcement point for key and
/// (week, ordinal) uniqueness. `count_in_week` only ever reflects committed
/// rows.
pub trait SampleRepo: Send + Sync {
    fn insert_sample(&self, record: SampleRecord) -> Result<(), StorageError>;
    fn count_in_week(&self, week: WeekBucket) -> Result<u32, StorageError>;
    fn sample_row(&self, key: &SampleKey) -> Result<Option<SampleRecord>, StorageError>;

    /// Rows owned by `owner`, ascending by primary key.
    fn samples_for_owner(
        &self,
        owner: &OwnerId,
        since: Option<WeekBucket>,
    ) -> Result<Vec<SampleRecord>, StorageError>;

    /// All rows, ascending by primary key.
    fn all_samples(&self, since: Option<WeekBucket>) -> Result<Vec<SampleRecord>, StorageError>;

    /// Marks a committed row as having its reference file. Fails with
    /// `ReferenceAlreadyAttached` if it already has one.
    fn attach_reference(
        &self,
        key: &SampleKey,
        attachment: ReferenceAttachment,
    ) -> Result<SampleRecord, StorageError>;
}

/// Versioned plate settings. Versions are append-only.
pub trait SettingsRepo: Send + Sync {
    fn current_settings(&self) -> Result<Arc<PlateSettings>, StorageError>;
    fn apply_settings(
        &self,
        plate_rows: u32,
        plate_cols: u32,
        updated_by: OwnerId,
        updated_at: DateTime<Utc>,
    ) -> Result<Arc<PlateSettings>, StorageError>;
    fn settings_history(&self) -> Result<Vec<Arc<PlateSettings>>, StorageError>;
}

impl<T: SampleRepo + ?Sized> SampleRepo for Arc<T> {
    fn insert_sample(&self, record: SampleRecord) -> Result<(), StorageError> {
        (**self).insert_sample(record)
    }

    fn count_in_week(&self, week: WeekBucket) -> Result<u32, StorageError> {
        (**self).count_in_week(week)
    }

    fn sample_row(&self, key: &SampleKey) -> Result<Option<SampleRecord>, StorageError> {
        (**self).sample_row(key)
    }

    fn samples_for_owner(
        &self,
        owner: &OwnerId,
        since: Option<WeekBucket>,
    ) -> Result<Vec<SampleRecord>, StorageError> {
        (**self).samples_for_owner(owner, since)
    }

    fn all_samples(&self, since: Option<WeekBucket>) -> Result<Vec<SampleRecord>, StorageError> {
        (**self).all_samples(since)
    }

    fn attach_reference(
        &self,
        key: &SampleKey,
        attachment: ReferenceAttachment,
    ) -> Result<SampleRecord, StorageError> {
        (**self).attach_reference(key, attachment)
    }
}

impl<T: SettingsRepo + ?Sized> SettingsRepo for Arc<T> {
    fn current_settings(&self) -> Result<Arc<PlateSettings>, StorageError> {
        (**self).current_settings()
    }

    fn apply_settings(
        &self,
        plate_rows: u32,
        plate_cols: u32,
        updated_by: OwnerId,
        updated_at: DateTime<Utc>,
    ) -> Result<Arc<PlateSettings>, StorageError> {
        (**self).apply_settings(plate_rows, plate_cols, updated_by, updated_at)
    }

    fn settings_history(&self) -> Result<Vec<Arc<PlateSettings>>, StorageError> {
        (**self).settings_history()
    }
}
