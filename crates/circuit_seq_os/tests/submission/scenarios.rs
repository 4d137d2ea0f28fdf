#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use circuit_seq_contracts::week::WeekBucket;
use circuit_seq_engines::identifier;
use circuit_seq_os::{
    SubmissionConfig, SubmissionOrchestrator, SubmissionOutcome, SubmitRejection, SubmitRequest,
};
use circuit_seq_storage::{CircuitSeqStore, FsReferenceStore, SampleRepo, SettingsRepo};

fn monday_w05() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 29, 0, 0, 0).unwrap()
}

fn orchestrator(
    dir: &std::path::Path,
    rows: u32,
    cols: u32,
) -> SubmissionOrchestrator<Arc<CircuitSeqStore>, FsReferenceStore> {
    let store = Arc::new(CircuitSeqStore::open_with_journal(dir.join("store.jsonl")).unwrap());
    let o = SubmissionOrchestrator::new(
        store,
        FsReferenceStore::new(dir.join("data")),
        SubmissionConfig::mvp_v1(),
    );
    o.ensure_settings(rows, cols, "admin@lab.org", monday_w05())
        .unwrap();
    o
}

#[test]
fn at_os_submit_01_remaining_decreases_by_one_per_accept_and_clamps() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), 1, 3);
    let now = monday_w05() + Duration::hours(8);
    let mut seen = vec![o.remaining_this_week(now).unwrap()];
    for i in 0..5 {
        o.submit(SubmitRequest::metadata_only(
            "a@lab.org",
            &format!("s{i}"),
            now,
        ));
        seen.push(o.remaining_this_week(now).unwrap());
    }
    assert_eq!(seen, vec![3, 2, 1, 0, 0, 0]);
}

#[test]
fn at_os_submit_02_capacity_resets_at_iso_week_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), 1, 1);
    let sunday_late = monday_w05() + Duration::days(7) - Duration::seconds(1);
    let next_monday = monday_w05() + Duration::days(7);

    let first = o.submit(SubmitRequest::metadata_only("a@lab.org", "x", sunday_late));
    assert_eq!(first.accepted().unwrap().primary_key.as_str(), "2024-05-001");
    assert!(matches!(
        o.submit(SubmitRequest::metadata_only("a@lab.org", "y", sunday_late)),
        SubmissionOutcome::Rejected(SubmitRejection::CapacityExceeded { .. })
    ));
    let next = o.submit(SubmitRequest::metadata_only("a@lab.org", "y", next_monday));
    assert_eq!(next.accepted().unwrap().primary_key.as_str(), "2024-06-001");
}

#[test]
fn at_os_submit_03_keys_match_generate_and_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let now = monday_w05() + Duration::hours(10);
    {
        let o = orchestrator(dir.path(), 2, 2);
        for name in ["a", "b", "c"] {
            assert!(o
                .submit(SubmitRequest::metadata_only("a@lab.org", name, now))
                .accepted()
                .is_some());
        }
    }

    let o = orchestrator(dir.path(), 9, 9);
    let settings = o.current_settings().unwrap();
    assert_eq!((settings.plate_rows, settings.plate_cols), (2, 2));
    assert_eq!(o.remaining_this_week(now).unwrap(), 1);

    let listing = o.all_samples(now).unwrap();
    for r in &listing.current {
        assert_eq!(
            identifier::generate(r.week_bucket, r.ordinal).unwrap(),
            r.primary_key
        );
    }
    let next = o.submit(SubmitRequest::metadata_only("a@lab.org", "d", now));
    assert_eq!(next.accepted().unwrap().ordinal.get(), 4);
}

#[test]
fn at_os_submit_04_settings_history_keeps_every_version() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), 8, 12);
    o.update_settings("admin@lab.org", 16, 24, monday_w05())
        .unwrap();
    let history = o.settings_history().unwrap();
    let capacities: Vec<u32> = history.iter().map(|s| s.capacity()).collect();
    assert_eq!(capacities, vec![96, 384]);
    assert_eq!(o.repo().settings_history().unwrap().len(), 2);
    assert!(o
        .update_settings("admin@lab.org", 0, 12, monday_w05())
        .is_err());
    assert_eq!(o.settings_history().unwrap().len(), 2);
}

#[test]
fn at_os_submit_05_owner_listing_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(dir.path(), 8, 12);
    let now = monday_w05() + Duration::hours(1);
    o.submit(SubmitRequest::metadata_only("a@lab.org", "x", now));
    o.submit(SubmitRequest::metadata_only("b@lab.org", "y", now));
    let a = o.samples_for_owner("a@lab.org", now).unwrap();
    assert_eq!(a.current.len(), 1);
    assert_eq!(a.current[0].owner.as_str(), "a@lab.org");
    assert!(o
        .samples_for_owner("nobody@lab.org", now)
        .unwrap()
        .current
        .is_empty());
    assert_eq!(
        o.repo()
            .count_in_week(WeekBucket::new(2024, 5).unwrap())
            .unwrap(),
        2
    );
}
