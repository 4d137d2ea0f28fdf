#![forbid(unsafe_code)]

use std::fs;

use chrono::Duration;
use circuit_seq_contracts::sample::{
    OwnerId, ReferenceAttachment, SampleName, SampleOrdinal, SampleRecord,
};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_engines::{identifier, week};
use circuit_seq_storage::{CircuitSeqStore, SampleRepo, SettingsRepo, StorageError};

fn row(ordinal: u32) -> SampleRecord {
    let bucket = WeekBucket::new(2024, 5).unwrap();
    let ordinal = SampleOrdinal::new(ordinal).unwrap();
    SampleRecord::v1(
        identifier::generate(bucket, ordinal).unwrap(),
        OwnerId::new("a@lab.org").unwrap(),
        SampleName::new("x").unwrap(),
        week::bounds_of(bucket).unwrap().start + Duration::minutes(5),
        bucket,
        ordinal,
    )
    .unwrap()
}

#[test]
fn at_journal_db_01_reopen_restores_rows_settings_and_references() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.jsonl");
    {
        let s = CircuitSeqStore::open_with_journal(&path).unwrap();
        let admin = OwnerId::new("admin@lab.org").unwrap();
        s.apply_settings(1, 2, admin, row(1).submitted_at).unwrap();
        s.insert_sample(row(1)).unwrap();
        s.insert_sample(row(2)).unwrap();
        s.attach_reference(
            &row(2).primary_key,
            ReferenceAttachment::v1("ref".to_string(), "a".repeat(64), 3).unwrap(),
        )
        .unwrap();
    }

    let reopened = CircuitSeqStore::open_with_journal(&path).unwrap();
    assert_eq!(reopened.journal_path(), Some(path.as_path()));
    assert_eq!(reopened.count_in_week(row(1).week_bucket).unwrap(), 2);
    assert_eq!(reopened.current_settings().unwrap().capacity(), 2);
    let second = reopened.sample_row(&row(2).primary_key).unwrap().unwrap();
    assert_eq!(second.reference_sequence_description(), Some("ref"));

    // Uniqueness survives a restart.
    assert!(matches!(
        reopened.insert_sample(row(1)),
        Err(StorageError::DuplicateKey { .. })
    ));
}

#[test]
fn at_journal_db_02_rejected_writes_are_not_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    let s = CircuitSeqStore::open_with_journal(&path).unwrap();
    s.insert_sample(row(1)).unwrap();
    assert!(s.insert_sample(row(1)).is_err());
    let lines = fs::read_to_string(&path).unwrap();
    assert_eq!(lines.lines().filter(|l| !l.trim().is_empty()).count(), 1);
}

#[test]
fn at_journal_db_03_corrupt_line_fails_open_with_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    fs::write(&path, "\n{not json}\n").unwrap();
    let err = CircuitSeqStore::open_with_journal(&path).unwrap_err();
    match err {
        StorageError::Journal { reason, .. } => assert!(reason.contains("line 2")),
        other => panic!("expected journal error, got {other:?}"),
    }
}

#[test]
fn at_journal_db_04_unknown_schema_version_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    fs::write(
        &path,
        r#"{"schema_version":9,"event":{"kind":"settings_applied"}}"#,
    )
    .unwrap();
    assert!(matches!(
        CircuitSeqStore::open_with_journal(&path),
        Err(StorageError::Journal { .. })
    ));
}

#[test]
fn at_journal_db_05_torn_tail_is_truncated_and_appends_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    {
        let s = CircuitSeqStore::open_with_journal(&path).unwrap();
        s.insert_sample(row(1)).unwrap();
    }
    let clean_len = fs::metadata(&path).unwrap().len();
    let mut torn = fs::read(&path).unwrap();
    torn.extend_from_slice(br#"{"schema_version":1,"event":{"kind":"sample_ins"#);
    fs::write(&path, torn).unwrap();

    let reopened = CircuitSeqStore::open_with_journal(&path).unwrap();
    assert_eq!(reopened.count_in_week(row(1).week_bucket).unwrap(), 1);
    assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);

    // The next ordinal is still free and lands on its own line.
    reopened.insert_sample(row(2)).unwrap();
    drop(reopened);
    let again = CircuitSeqStore::open_with_journal(&path).unwrap();
    assert_eq!(again.count_in_week(row(1).week_bucket).unwrap(), 2);
}

#[test]
fn at_journal_db_06_complete_unterminated_tail_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    {
        let s = CircuitSeqStore::open_with_journal(&path).unwrap();
        s.insert_sample(row(1)).unwrap();
    }
    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.trim_end()).unwrap();

    let reopened = CircuitSeqStore::open_with_journal(&path).unwrap();
    assert_eq!(reopened.count_in_week(row(1).week_bucket).unwrap(), 1);
    reopened.insert_sample(row(2)).unwrap();
    drop(reopened);

    let again = CircuitSeqStore::open_with_journal(&path).unwrap();
    assert_eq!(again.count_in_week(row(1).week_bucket).unwrap(), 2);
    let lines = fs::read_to_string(&path).unwrap();
    assert!(lines.ends_with('\n'));
    assert_eq!(lines.lines().count(), 2);
}

#[test]
fn at_journal_db_07_torn_line_before_the_tail_still_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    {
        let s = CircuitSeqStore::open_with_journal(&path).unwrap();
        s.insert_sample(row(1)).unwrap();
    }
    let mut text = fs::read_to_string(&path).unwrap();
    text.push_str("{\"schema_version\":1,\"ev\n");
    fs::write(&path, text).unwrap();
    assert!(matches!(
        CircuitSeqStore::open_with_journal(&path),
        Err(StorageError::Journal { .. })
    ));
}
