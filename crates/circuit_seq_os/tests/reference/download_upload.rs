#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use circuit_seq_contracts::sample::SampleRecord;
use circuit_seq_os::{
    ServiceError, SubmissionConfig, SubmissionOrchestrator, SubmissionOutcome, SubmitFailure,
    SubmitRequest,
};
use circuit_seq_storage::{
    CircuitSeqStore, FsReferenceStore, ReferenceFileStore, ReferenceStoreError,
};

const FASTA: &[u8] = b">pUC19 cloning vector\nACGTACGTACGT\n";

/// Filesystem store whose first write fails.
struct FlakyFiles {
    inner: FsReferenceStore,
    fail_next: AtomicBool,
}

impl ReferenceFileStore for FlakyFiles {
    fn path_for(&self, sample: &SampleRecord) -> PathBuf {
        self.inner.path_for(sample)
    }

    fn store(&self, sample: &SampleRecord, bytes: &[u8]) -> Result<PathBuf, ReferenceStoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ReferenceStoreError::Io {
                path: self.path_for(sample),
                source: std::io::Error::new(std::io::ErrorKind::Other, "device unavailable"),
            });
        }
        self.inner.store(sample, bytes)
    }

    fn fetch(&self, sample: &SampleRecord) -> Result<Vec<u8>, ReferenceStoreError> {
        self.inner.fetch(sample)
    }

    fn remove(&self, sample: &SampleRecord) -> Result<(), ReferenceStoreError> {
        self.inner.remove(sample)
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 31, 9, 30, 0).unwrap()
}

fn orchestrator(
    root: &std::path::Path,
    fail_first_store: bool,
) -> SubmissionOrchestrator<CircuitSeqStore, FlakyFiles> {
    let o = SubmissionOrchestrator::new(
        CircuitSeqStore::new_in_memory(),
        FlakyFiles {
            inner: FsReferenceStore::new(root),
            fail_next: AtomicBool::new(fail_first_store),
        },
        SubmissionConfig::mvp_v1(),
    );
    o.update_settings("admin@lab.org", 8, 12, now()).unwrap();
    o
}

#[test]
fn at_os_ref_01_submit_with_file_lands_on_convention_path() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), false);
    let out = o.submit(
        SubmitRequest::metadata_only("a@lab.org", "pUC19", now())
            .with_reference(Some("puc19.fa"), FASTA.to_vec()),
    );
    let record = out.accepted().unwrap();
    assert!(record.has_reference_sequence());
    assert_eq!(
        record.reference_sequence_description(),
        Some("pUC19 cloning vector")
    );
    let expected = dir
        .path()
        .join("2024")
        .join("5")
        .join("reference")
        .join("2024-05-001_pUC19.fasta");
    assert_eq!(std::fs::read(expected).unwrap(), FASTA.to_vec());
}

#[test]
fn at_os_ref_02_failed_upload_is_retried_without_new_slot() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), true);
    let out = o.submit(
        SubmitRequest::metadata_only("a@lab.org", "x", now())
            .with_reference(None, FASTA.to_vec()),
    );
    let key = match out {
        SubmissionOutcome::Failed(SubmitFailure::StorageFailure { sample, .. }) => {
            sample.primary_key.to_string()
        }
        other => panic!("unexpected outcome {other:?}"),
    };
    let remaining = o.remaining_this_week(now()).unwrap();
    assert_eq!(remaining, 95);

    assert!(matches!(
        o.fetch_reference("a@lab.org", &key, false),
        Err(ServiceError::NoReferenceSequence { .. })
    ));
    let updated = o
        .upload_reference("a@lab.org", &key, Some("x.fasta"), FASTA.to_vec())
        .unwrap();
    assert!(updated.has_reference_sequence());
    assert_eq!(o.remaining_this_week(now()).unwrap(), remaining);

    let download = o.fetch_reference("a@lab.org", &key, false).unwrap();
    assert_eq!(download.file_name, "2024-05-001_x.fasta");
    assert_eq!(download.bytes, FASTA.to_vec());

    assert!(matches!(
        o.upload_reference("a@lab.org", &key, None, FASTA.to_vec()),
        Err(ServiceError::ReferenceAlreadyStored { .. })
    ));
}

#[test]
fn at_os_ref_03_other_owners_see_not_found_unless_admin() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), false);
    let record = o
        .submit(
            SubmitRequest::metadata_only("a@lab.org", "x", now())
                .with_reference(None, FASTA.to_vec()),
        )
        .accepted()
        .cloned()
        .unwrap();
    let key = record.primary_key.as_str();

    assert!(matches!(
        o.fetch_reference("b@lab.org", key, false),
        Err(ServiceError::SampleNotFound { .. })
    ));
    assert!(o.fetch_reference("admin@lab.org", key, true).is_ok());
    assert!(matches!(
        o.upload_reference("b@lab.org", key, None, FASTA.to_vec()),
        Err(ServiceError::SampleNotFound { .. })
    ));
    assert!(matches!(
        o.fetch_reference("a@lab.org", "2024-05-099", false),
        Err(ServiceError::SampleNotFound { .. })
    ));
    assert!(matches!(
        o.fetch_reference("a@lab.org", "not-a-key", false),
        Err(ServiceError::InvalidInput(_))
    ));
}

#[test]
fn at_os_ref_04_tampered_file_fails_digest_check() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), false);
    let record = o
        .submit(
            SubmitRequest::metadata_only("a@lab.org", "x", now())
                .with_reference(None, FASTA.to_vec()),
        )
        .accepted()
        .cloned()
        .unwrap();
    std::fs::write(o.files().path_for(&record), b">x\nTTTT\n").unwrap();
    assert!(matches!(
        o.fetch_reference("a@lab.org", record.primary_key.as_str(), false),
        Err(ServiceError::StorageFailure { .. })
    ));
}

#[test]
fn at_os_ref_05_leftover_identical_file_is_adopted_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), false);
    let record = o
        .submit(SubmitRequest::metadata_only("a@lab.org", "x", now()))
        .accepted()
        .cloned()
        .unwrap();
    o.files().store(&record, FASTA).unwrap();

    assert!(matches!(
        o.upload_reference(
            "a@lab.org",
            record.primary_key.as_str(),
            None,
            b">other\nGGGG\n".to_vec()
        ),
        Err(ServiceError::StorageFailure { .. })
    ));
    let updated = o
        .upload_reference("a@lab.org", record.primary_key.as_str(), None, FASTA.to_vec())
        .unwrap();
    assert!(updated.has_reference_sequence());
}
