#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use circuit_seq_contracts::sample::{
    OwnerId, ReferenceAttachment, SampleKey, SampleOrdinal, SampleRecord,
};
use circuit_seq_contracts::settings::{PlateSettings, SettingsVersion};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_contracts::{ContractViolation, Validate};
use circuit_seq_engines::{identifier, week};
use tracing::{debug, info};

use crate::journal::{Journal, StoreEvent};
use crate::repo::{SampleRepo, SettingsRepo};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("duplicate ordinal {ordinal} in week {week}")]
    DuplicateOrdinal { week: WeekBucket, ordinal: u32 },
    #[error("{table} row not found: {key}")]
    NotFound { table: &'static str, key: String },
    #[error("sample {key} already has a reference sequence")]
    ReferenceAlreadyAttached { key: String },
    #[error("inconsistent {table} row {key}: {reason}")]
    InconsistentRow {
        table: &'static str,
        key: String,
        reason: &'static str,
    },
    #[error("journal {}: {reason}", .path.display())]
    Journal { path: PathBuf, reason: String },
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl StorageError {
    /// Uniqueness conflicts on insert; the only errors a caller may answer
    /// with a fresh reservation.
    pub fn is_uniqueness_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::DuplicateKey { .. } | StorageError::DuplicateOrdinal { .. }
        )
    }
}

/// Plain single-threaded table set. All invariant checks live here; the
/// shared [`CircuitSeqStore`] wraps it in a lock and a journal.
#[derive(Debug, Clone, Default)]
pub struct SampleTables {
    samples: BTreeMap<SampleKey, SampleRecord>,
    // (week, ordinal) -> key; the storage-level uniqueness constraint.
    week_ordinal_index: BTreeMap<(WeekBucket, SampleOrdinal), SampleKey>,
    owner_index: BTreeSet<(OwnerId, SampleKey)>,
    settings_ledger: Vec<Arc<PlateSettings>>,
}

impl SampleTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_insert(&self, record: &SampleRecord) -> Result<(), StorageError> {
        record.validate()?;
        let key = record.primary_key.as_str().to_string();
        if record.reference.is_some() {
            return Err(StorageError::InconsistentRow {
                table: "samples",
                key,
                reason: "reference must be attached after commit",
            });
        }
        if week::bucket_for(record.submitted_at)? != record.week_bucket {
            return Err(StorageError::InconsistentRow {
                table: "samples",
                key,
                reason: "week_bucket does not contain submitted_at",
            });
        }
        if identifier::generate(record.week_bucket, record.ordinal)? != record.primary_key {
            return Err(StorageError::InconsistentRow {
                table: "samples",
                key,
                reason: "primary_key is not generate(week_bucket, ordinal)",
            });
        }
        if self.samples.contains_key(&record.primary_key) {
            return Err(StorageError::DuplicateKey {
                table: "samples",
                key,
            });
        }
        if self
            .week_ordinal_index
            .contains_key(&(record.week_bucket, record.ordinal))
        {
            return Err(StorageError::DuplicateOrdinal {
                week: record.week_bucket,
                ordinal: record.ordinal.get(),
            });
        }
        Ok(())
    }

    pub fn insert_sample(&mut self, record: SampleRecord) -> Result<(), StorageError> {
        self.check_insert(&record)?;
        self.apply_insert(record);
        Ok(())
    }

    fn apply_insert(&mut self, record: SampleRecord) {
        self.week_ordinal_index.insert(
            (record.week_bucket, record.ordinal),
            record.primary_key.clone(),
        );
        self.owner_index
            .insert((record.owner.clone(), record.primary_key.clone()));
        self.samples.insert(record.primary_key.clone(), record);
    }

    pub fn check_attach(
        &self,
        key: &SampleKey,
        attachment: &ReferenceAttachment,
    ) -> Result<(), StorageError> {
        attachment.validate()?;
        let row = self.samples.get(key).ok_or_else(|| StorageError::NotFound {
            table: "samples",
            key: key.as_str().to_string(),
        })?;
        if row.reference.is_some() {
            return Err(StorageError::ReferenceAlreadyAttached {
                key: key.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn attach_reference(
        &mut self,
        key: &SampleKey,
        attachment: ReferenceAttachment,
    ) -> Result<SampleRecord, StorageError> {
        self.check_attach(key, &attachment)?;
        self.apply_attach(key, attachment)
    }

    fn apply_attach(
        &mut self,
        key: &SampleKey,
        attachment: ReferenceAttachment,
    ) -> Result<SampleRecord, StorageError> {
        let row = self
            .samples
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound {
                table: "samples",
                key: key.as_str().to_string(),
            })?;
        row.reference = Some(attachment);
        Ok(row.clone())
    }

    pub fn sample_row(&self, key: &SampleKey) -> Option<&SampleRecord> {
        self.samples.get(key)
    }

    pub fn count_in_week(&self, week: WeekBucket) -> u32 {
        self.week_ordinal_index
            .range((week, SampleOrdinal::FIRST)..)
            .take_while(|((w, _), _)| *w == week)
            .count() as u32
    }

    pub fn samples_for_owner(
        &self,
        owner: &OwnerId,
        since: Option<WeekBucket>,
    ) -> Vec<SampleRecord> {
        self.owner_index
            .iter()
            .filter(|(o, _)| o == owner)
            .filter_map(|(_, key)| self.samples.get(key))
            .filter(|r| since.map_or(true, |s| r.week_bucket >= s))
            .cloned()
            .collect()
    }

    pub fn all_samples(&self, since: Option<WeekBucket>) -> Vec<SampleRecord> {
        self.samples
            .values()
            .filter(|r| since.map_or(true, |s| r.week_bucket >= s))
            .cloned()
            .collect()
    }

    pub fn next_settings_version(&self) -> SettingsVersion {
        self.settings_ledger
            .last()
            .map(|s| s.version.next())
            .unwrap_or(SettingsVersion::FIRST)
    }

    pub fn check_settings(&self, settings: &PlateSettings) -> Result<(), StorageError> {
        settings.validate()?;
        if settings.version != self.next_settings_version() {
            return Err(StorageError::DuplicateKey {
                table: "plate_settings",
                key: settings.version.0.to_string(),
            });
        }
        Ok(())
    }

    pub fn apply_settings(
        &mut self,
        settings: PlateSettings,
    ) -> Result<Arc<PlateSettings>, StorageError> {
        self.check_settings(&settings)?;
        let settings = Arc::new(settings);
        self.settings_ledger.push(settings.clone());
        Ok(settings)
    }

    pub fn current_settings(&self) -> Option<Arc<PlateSettings>> {
        self.settings_ledger.last().cloned()
    }

    pub fn settings_history(&self) -> &[Arc<PlateSettings>] {
        &self.settings_ledger
    }

    fn replay(&mut self, event: StoreEvent) -> Result<(), StorageError> {
        match event {
            StoreEvent::SampleInserted(record) => self.insert_sample(record),
            StoreEvent::ReferenceAttached {
                primary_key,
                attachment,
            } => self.attach_reference(&primary_key, attachment).map(|_| ()),
            StoreEvent::SettingsApplied(settings) => self.apply_settings(settings).map(|_| ()),
        }
    }
}

/// Thread-safe sample + settings store.
///
/// Every write validates against the tables, appends to the journal when
/// one is configured, and only then becomes visible, all under one lock, so
/// readers never observe a row that is not durable.
#[derive(Debug)]
pub struct CircuitSeqStore {
    tables: Mutex<SampleTables>,
    journal: Option<Journal>,
}

impl CircuitSeqStore {
    pub fn new_in_memory() -> Self {
        Self {
            tables: Mutex::new(SampleTables::new()),
            journal: None,
        }
    }

    /// Opens (creating if needed) the journal at `path` and replays it.
    pub fn open_with_journal(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let journal = Journal::open(path.as_ref())?;
        let mut tables = SampleTables::new();
        let mut replayed = 0usize;
        for (line_no, event) in journal.read_events()? {
            tables.replay(event).map_err(|err| StorageError::Journal {
                path: journal.path().to_path_buf(),
                reason: format!("replay failed at line {line_no}: {err}"),
            })?;
            replayed += 1;
        }
        info!(
            path = %journal.path().display(),
            replayed,
            samples = tables.samples.len(),
            settings_versions = tables.settings_ledger.len(),
            "store journal replayed"
        );
        Ok(Self {
            tables: Mutex::new(tables),
            journal: Some(journal),
        })
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_ref().map(Journal::path)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SampleTables>, StorageError> {
        self.tables.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn persist(&self, event: &StoreEvent) -> Result<(), StorageError> {
        match &self.journal {
            Some(journal) => journal.append(event),
            None => Ok(()),
        }
    }
}

impl SampleRepo for CircuitSeqStore {
    fn insert_sample(&self, record: SampleRecord) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        tables.check_insert(&record)?;
        self.persist(&StoreEvent::SampleInserted(record.clone()))?;
        debug!(primary_key = %record.primary_key, week = %record.week_bucket, "sample row committed");
        tables.apply_insert(record);
        Ok(())
    }

    fn count_in_week(&self, week: WeekBucket) -> Result<u32, StorageError> {
        Ok(self.lock()?.count_in_week(week))
    }

    fn sample_row(&self, key: &SampleKey) -> Result<Option<SampleRecord>, StorageError> {
        Ok(self.lock()?.sample_row(key).cloned())
    }

    fn samples_for_owner(
        &self,
        owner: &OwnerId,
        since: Option<WeekBucket>,
    ) -> Result<Vec<SampleRecord>, StorageError> {
        Ok(self.lock()?.samples_for_owner(owner, since))
    }

    fn all_samples(&self, since: Option<WeekBucket>) -> Result<Vec<SampleRecord>, StorageError> {
        Ok(self.lock()?.all_samples(since))
    }

    fn attach_reference(
        &self,
        key: &SampleKey,
        attachment: ReferenceAttachment,
    ) -> Result<SampleRecord, StorageError> {
        let mut tables = self.lock()?;
        tables.check_attach(key, &attachment)?;
        self.persist(&StoreEvent::ReferenceAttached {
            primary_key: key.clone(),
            attachment: attachment.clone(),
        })?;
        tables.apply_attach(key, attachment)
    }
}

impl SettingsRepo for CircuitSeqStore {
    fn current_settings(&self) -> Result<Arc<PlateSettings>, StorageError> {
        self.lock()?
            .current_settings()
            .ok_or(StorageError::NotFound {
                table: "plate_settings",
                key: "current".to_string(),
            })
    }

    fn apply_settings(
        &self,
        plate_rows: u32,
        plate_cols: u32,
        updated_by: OwnerId,
        updated_at: DateTime<Utc>,
    ) -> Result<Arc<PlateSettings>, StorageError> {
        let mut tables = self.lock()?;
        let settings = PlateSettings::v1(
            tables.next_settings_version(),
            plate_rows,
            plate_cols,
            updated_by,
            updated_at,
        )?;
        tables.check_settings(&settings)?;
        self.persist(&StoreEvent::SettingsApplied(settings.clone()))?;
        let applied = tables.apply_settings(settings)?;
        info!(
            version = applied.version.0,
            plate_rows = applied.plate_rows,
            plate_cols = applied.plate_cols,
            updated_by = %applied.updated_by,
            "plate settings applied"
        );
        Ok(applied)
    }

    fn settings_history(&self) -> Result<Vec<Arc<PlateSettings>>, StorageError> {
        Ok(self.lock()?.settings_history().to_vec())
    }
}
