#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use circuit_seq_contracts::sample::SampleOrdinal;
use circuit_seq_contracts::settings::PlateSettings;
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_engines::capacity::{self, SlotDecision};
use circuit_seq_storage::{SampleRepo, StorageError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("week {week} is full ({committed}/{capacity})")]
    CapacityExceeded {
        week: WeekBucket,
        capacity: u32,
        committed: u32,
    },
    #[error("allocation lock poisoned for week {week}")]
    LockPoisoned { week: WeekBucket },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Single authority for weekly admission.
///
/// Holds one exclusive lock per week bucket. The lock is held from reading
/// the committed count until the caller's commit returns, so two callers can
/// never observe the same count for the same week.
#[derive(Debug, Default)]
pub struct CapacityAllocator {
    week_locks: Mutex<BTreeMap<WeekBucket, Arc<Mutex<()>>>>,
}

impl CapacityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next ordinal of `week` under `settings` and runs `commit`
    /// with it while the week lock is held.
    ///
    /// `commit` must durably persist the sample row before returning `Ok`;
    /// an `Err` from it leaves the count unchanged.
    pub fn try_reserve_slot<R, T, F>(
        &self,
        repo: &R,
        week: WeekBucket,
        settings: &PlateSettings,
        commit: F,
    ) -> Result<T, AllocationError>
    where
        R: SampleRepo + ?Sized,
        F: FnOnce(SampleOrdinal) -> Result<T, StorageError>,
    {
        let lock = self.week_lock(week)?;
        let _held = lock
            .lock()
            .map_err(|_| AllocationError::LockPoisoned { week })?;

        let committed = repo.count_in_week(week)?;
        match capacity::evaluate_slot(committed, settings) {
            SlotDecision::Full {
                capacity,
                committed,
            } => Err(AllocationError::CapacityExceeded {
                week,
                capacity,
                committed,
            }),
            SlotDecision::Admit(ordinal) => {
                debug!(%week, ordinal = ordinal.get(), settings_version = settings.version.0, "slot reserved");
                Ok(commit(ordinal)?)
            }
        }
    }

    fn week_lock(&self, week: WeekBucket) -> Result<Arc<Mutex<()>>, AllocationError> {
        let mut locks = self
            .week_locks
            .lock()
            .map_err(|_| AllocationError::LockPoisoned { week })?;
        // A lock only the table references is idle and can be dropped.
        locks.retain(|w, l| *w == week || Arc::strong_count(l) > 1);
        Ok(Arc::clone(locks.entry(week).or_default()))
    }

    pub fn tracked_weeks(&self) -> usize {
        self.week_locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
