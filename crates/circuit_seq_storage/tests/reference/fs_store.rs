#![forbid(unsafe_code)]

use chrono::{TimeZone, Utc};
use circuit_seq_contracts::sample::{OwnerId, SampleName, SampleOrdinal, SampleRecord};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_engines::identifier;
use circuit_seq_storage::{FsReferenceStore, ReferenceFileStore, ReferenceStoreError};

fn sample(name: &str) -> SampleRecord {
    let bucket = WeekBucket::new(2024, 5).unwrap();
    let ordinal = SampleOrdinal::new(7).unwrap();
    SampleRecord::v1(
        identifier::generate(bucket, ordinal).unwrap(),
        OwnerId::new("a@lab.org").unwrap(),
        SampleName::new(name).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 30, 12, 0, 0).unwrap(),
        bucket,
        ordinal,
    )
    .unwrap()
}

#[test]
fn at_ref_store_01_path_follows_year_week_key_name_convention() {
    let store = FsReferenceStore::new("/data");
    let path = store.path_for(&sample("pUC19"));
    assert_eq!(
        path,
        std::path::PathBuf::from("/data/2024/5/reference/2024-05-007_pUC19.fasta")
    );
}

#[test]
fn at_ref_store_02_store_then_fetch_round_trips_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsReferenceStore::new(dir.path());
    let s = sample("x");
    let path = store.store(&s, b">x\nACGT\n").unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(store.fetch(&s).unwrap(), b">x\nACGT\n".to_vec());
}

#[test]
fn at_ref_store_03_second_store_for_same_key_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsReferenceStore::new(dir.path());
    let s = sample("x");
    store.store(&s, b"first").unwrap();
    assert!(matches!(
        store.store(&s, b"second"),
        Err(ReferenceStoreError::AlreadyExists(_))
    ));
    assert_eq!(store.fetch(&s).unwrap(), b"first".to_vec());
}

#[test]
fn at_ref_store_04_fetch_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsReferenceStore::new(dir.path());
    assert!(matches!(
        store.fetch(&sample("x")),
        Err(ReferenceStoreError::NotFound(_))
    ));
}

#[test]
fn at_ref_store_05_unwritable_root_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"file").unwrap();
    let store = FsReferenceStore::new(&blocker);
    assert!(matches!(
        store.store(&sample("x"), b"data"),
        Err(ReferenceStoreError::Io { .. })
    ));
}

#[test]
fn at_ref_store_06_remove_clears_file_and_tolerates_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsReferenceStore::new(dir.path());
    let s = sample("x");
    store.store(&s, b"data").unwrap();
    store.remove(&s).unwrap();
    assert!(!store.path_for(&s).exists());
    store.remove(&s).unwrap();
    store.store(&s, b"again").unwrap();
    assert_eq!(store.fetch(&s).unwrap(), b"again".to_vec());
}
