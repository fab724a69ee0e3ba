// End-to-end checks against a file-backed SQLite store

use std::io::Write;

use chrono::{NaiveDate, Utc};
use hours_ledger::{
    consolidate_date, import_attendance, load_form_responses, merge, merge_members, reconcile_all, seed_attendance, verify_all,
    AttendanceRecord, EngineConfig, EntryFilter, EntryOrigin, HourCategory, HourTotals,
    LedgerEntry, LegacyIndex, LegacyRow, Meeting, Member, MemberId, RecordStore, RunOptions,
    SessionType, SqliteStore,
};

fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("ledger.db")).unwrap()
}

fn synthetic_entries(store: &SqliteStore, member: &MemberId) -> Vec<LedgerEntry> {
    store
        .find_entries(&EntryFilter::for_member(member))
        .unwrap()
        .into_iter()
        .filter(|e| e.is_synthetic())
        .collect()
}

#[test]
fn reconcile_is_idempotent_and_conserves_totals() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let config = EngineConfig::unthrottled();

    store.insert_member(&Member::new("S100", "Alice Sosa").with_hours(10.0, 3.0)).unwrap();
    store.insert_member(&Member::new("200", "Xuan Ho")).unwrap();
    store
        .insert_entries(&[LedgerEntry::approved(
            &MemberId::new("200"),
            HourCategory::Social,
            1.5,
            "Bake Sale",
            Utc::now(),
        )])
        .unwrap();

    let legacy = LegacyIndex::from_rows(vec![
        LegacyRow::new("s100", "Alice Sosa", "10", "3"),
        LegacyRow::new("200", "Xuan Ho", "2", "5"),
    ]);

    let first = reconcile_all(&mut store, &legacy, &config, RunOptions::default()).unwrap();
    assert_eq!(first.summary.succeeded, 2);
    assert!(first.summary.is_clean());

    // No double count: 10 / 3 becomes 7 / 3 / 10
    let alice = MemberId::new("100");
    assert_eq!(
        store.get_member(&alice).unwrap().unwrap().totals(),
        HourTotals::from_parts(7.0, 3.0)
    );

    // Overlap clamp: 2 / 5 yields a social entry only
    let xuan = MemberId::new("200");
    let xuan_synthetic = synthetic_entries(&store, &xuan);
    assert_eq!(xuan_synthetic.len(), 1);
    assert_eq!(xuan_synthetic[0].category, HourCategory::Social);
    assert_eq!(
        store.get_member(&xuan).unwrap().unwrap().totals(),
        HourTotals::from_parts(0.0, 6.5)
    );

    // Idempotence
    let second = reconcile_all(&mut store, &legacy, &config, RunOptions::default()).unwrap();
    assert_eq!(second.summary.succeeded, 0);
    assert_eq!(second.summary.skipped, 2);

    let report = verify_all(&store, &legacy, &config).unwrap();
    assert!(report.is_balanced());
    for member in [&alice, &xuan] {
        let totals = store.get_member(member).unwrap().unwrap().totals();
        assert!(totals.is_conserved(config.tolerance));
    }
}

#[test]
fn duplicate_synthetic_entries_collapse_to_one_per_category() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let config = EngineConfig::unthrottled();
    let alice = MemberId::new("100");

    store.insert_member(&Member::new("100", "Alice Sosa").with_hours(21.0, 3.0)).unwrap();
    let now = Utc::now();
    let mut stale = Vec::new();
    for _ in 0..3 {
        stale.push(LedgerEntry::synthetic(
            &alice,
            EntryOrigin::LegacyImport,
            HourCategory::Volunteering,
            7.0,
            String::new(),
            now,
        ));
    }
    stale.push(LedgerEntry::synthetic(
        &alice,
        EntryOrigin::DeprecatedAdjustment,
        HourCategory::Social,
        3.0,
        String::new(),
        now,
    ));
    store.insert_entries(&stale).unwrap();

    let legacy = LegacyIndex::from_rows(vec![LegacyRow::new("100", "Alice Sosa", "10", "3")]);
    let report = reconcile_all(&mut store, &legacy, &config, RunOptions::default()).unwrap();
    assert_eq!(report.duplicates_removed, 3);

    let remaining = synthetic_entries(&store, &alice);
    assert_eq!(remaining.len(), 2);
    for category in HourCategory::ALL {
        let live: Vec<_> = remaining
            .iter()
            .filter(|e| e.category == category && e.is_live())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].origin, EntryOrigin::LegacyImport);
    }
    assert_eq!(
        store.get_member(&alice).unwrap().unwrap().totals(),
        HourTotals::from_parts(7.0, 3.0)
    );
}

#[test]
fn attendance_merge_and_seed_converge() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let config = EngineConfig::unthrottled();
    let date = NaiveDate::from_ymd_opt(2025, 12, 8).unwrap();
    let a = MemberId::new("100");
    let b = MemberId::new("200");

    for (id, name) in [("100", "A"), ("200", "B"), ("300", "C")] {
        store.insert_member(&Member::new(id, name)).unwrap();
    }

    let source = Meeting::new(date, "General Meeting", SessionType::Both, false);
    let target = Meeting::new(date, "General Meeting", SessionType::Both, false);
    store.insert_meeting(&source).unwrap();
    store.insert_meeting(&target).unwrap();
    store
        .insert_attendance(&[
            AttendanceRecord::new(&source.id, &a, SessionType::Both),
            AttendanceRecord::new(&source.id, &b, SessionType::Both),
            AttendanceRecord::new(&target.id, &a, SessionType::Both),
        ])
        .unwrap();

    // {A, B} into {A} leaves {A, B} and no source meeting
    let outcome = merge(&mut store, &source.id, &target.id, &config.actor).unwrap();
    assert_eq!((outcome.moved, outcome.deduped), (1, 1));
    assert!(outcome.meeting_deleted);
    assert_eq!(store.attendance_for_meeting(&target.id).unwrap().len(), 2);
    assert!(merge(&mut store, &source.id, &target.id, &config.actor).unwrap().is_noop());

    // Single meeting left on the date: consolidation has nothing to fold
    let consolidated = consolidate_date(&mut store, date, &config.actor).unwrap();
    assert_eq!(consolidated.canonical_meeting_id.as_deref(), Some(target.id.as_str()));
    assert!(consolidated.merges.is_empty());

    // Seeding the same date fills in the missing member only
    let seeded = seed_attendance(&mut store, date, SessionType::Both, &config).unwrap();
    assert_eq!(seeded.meeting_id, target.id);
    assert_eq!(seeded.created, 1);
    assert_eq!(seeded.skipped, 2);

    let again = seed_attendance(&mut store, date, SessionType::Both, &config).unwrap();
    assert_eq!(again.created, 0);
}

#[test]
fn member_merge_then_reconcile_balances() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let config = EngineConfig::unthrottled();
    let keep = MemberId::new("100");
    let dup = MemberId::new("900");

    store.insert_member(&Member::new("100", "Brooke James").with_hours(1.0, 0.0)).unwrap();
    store.insert_member(&Member::new("900", "Brooke James").with_hours(2.0, 0.0)).unwrap();
    let now = Utc::now();
    store
        .insert_entries(&[
            LedgerEntry::approved(&keep, HourCategory::Volunteering, 1.0, "Food Drive", now),
            LedgerEntry::approved(&dup, HourCategory::Volunteering, 2.0, "Park Cleanup", now),
        ])
        .unwrap();

    let outcome = merge_members(&mut store, &keep, &dup, &config).unwrap();
    assert!(outcome.member_deleted);
    assert_eq!(outcome.after, HourTotals::from_parts(3.0, 0.0));

    let report = verify_all(&store, &LegacyIndex::default(), &config).unwrap();
    assert!(report.is_balanced());
}

#[test]
fn form_import_joins_existing_meeting_and_converges() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = open_store(&dir);
    let config = EngineConfig::unthrottled();
    let date = NaiveDate::from_ymd_opt(2025, 12, 8).unwrap();

    let existing = Meeting::new(date, "General Meeting", SessionType::Both, true);
    store.insert_meeting(&existing).unwrap();
    store
        .insert_attendance(&[AttendanceRecord::new(&existing.id, &MemberId::new("100"), SessionType::Both)])
        .unwrap();

    let csv_path = dir.path().join("responses.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(file, "Timestamp,First Name,Last Name,S Number (No s),Meeting Time").unwrap();
    writeln!(file, "12/8/2025 17:41:37,Ada,Park,S100,Morning").unwrap();
    writeln!(file, "12/8/2025 17:43:02,Ben,Ortiz,s-200,Afternoon").unwrap();
    writeln!(file, "12/9/2025 09:10:00,Cy,Lee,300").unwrap();
    writeln!(file, "12/9/2025 09:12:00,No,Id,,Morning").unwrap();
    drop(file);

    let sheet = load_form_responses(&csv_path).unwrap();
    assert_eq!(sheet.responses.len(), 4);

    let first = import_attendance(&mut store, &sheet.responses, &config).unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.skipped, 1);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].line, 5);
    assert_eq!(first.meetings[0].meeting_id, existing.id);
    assert!(!first.meetings[0].created);
    assert!(first.meetings[1].created);
    assert_eq!(store.attendance_for_meeting(&existing.id).unwrap().len(), 2);

    let second = import_attendance(&mut store, &sheet.responses, &config).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(store.counts().unwrap().meetings, 2);
}
