// 👥 Member Accounts - find and fold duplicate member accounts
//
// A duplicate account's ledger entries and attendance move to the kept
// account, then the kept aggregate is refreshed from the merged ledger.

use crate::batch::FailureDetail;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{Event, HourCategory, HourTotals, LedgerEntry, Member, MemberId};
use crate::store::{EntryFilter, RecordStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Case-insensitive substring lookup on member names
pub fn find_members_by_name<S: RecordStore + ?Sized>(
    store: &S,
    fragment: &str,
) -> EngineResult<Vec<Member>> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return Ok(Vec::new());
    }
    Ok(store.search_members_by_name(fragment)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberMergeOutcome {
    pub kept: MemberId,
    pub duplicate: MemberId,
    pub entries_reassigned: usize,
    pub attendance_moved: usize,
    pub attendance_deduped: usize,
    pub member_deleted: bool,
    pub before: HourTotals,
    pub after: HourTotals,
    pub failures: Vec<FailureDetail>,
}

/// Sum of every live entry, synthetic included
fn live_totals(entries: &[LedgerEntry]) -> HourTotals {
    let sum = |category: HourCategory| -> f64 {
        entries
            .iter()
            .filter(|e| e.is_live() && e.category == category)
            .map(|e| e.hours.max(0.0))
            .sum()
    };
    HourTotals::from_parts(sum(HourCategory::Volunteering), sum(HourCategory::Social))
}

/// Fold `duplicate_id` into `keep_id`.
///
/// While any record fails to move, the duplicate member is kept so a re-run
/// can finish the job. A failed aggregate write is reported in the outcome
/// and `after` keeps the stored totals.
pub fn merge_members<S: RecordStore + ?Sized>(
    store: &mut S,
    keep_id: &MemberId,
    duplicate_id: &MemberId,
    config: &EngineConfig,
) -> EngineResult<MemberMergeOutcome> {
    if keep_id == duplicate_id {
        return Err(EngineError::SameMember(keep_id.to_string()));
    }
    let kept = store
        .get_member(keep_id)?
        .ok_or_else(|| EngineError::MemberNotFound(keep_id.to_string()))?;
    let duplicate = store
        .get_member(duplicate_id)?
        .ok_or_else(|| EngineError::MemberNotFound(duplicate_id.to_string()))?;

    tracing::info!(
        keep = %kept.id,
        keep_name = %kept.name,
        duplicate = %duplicate.id,
        duplicate_name = %duplicate.name,
        "merging member accounts"
    );

    let mut outcome = MemberMergeOutcome {
        kept: kept.id.clone(),
        duplicate: duplicate.id.clone(),
        entries_reassigned: 0,
        attendance_moved: 0,
        attendance_deduped: 0,
        member_deleted: false,
        before: kept.totals(),
        after: kept.totals(),
        failures: Vec::new(),
    };

    // Ledger entries
    for entry in store.find_entries(&EntryFilter::for_member(duplicate_id))? {
        match store.reassign_entry(&entry.id, keep_id) {
            Ok(()) => outcome.entries_reassigned += 1,
            Err(e) => outcome
                .failures
                .push(FailureDetail::new(format!("ledger entry {}", entry.id), e)),
        }
    }

    // Attendance, one record per meeting
    let kept_meetings: HashSet<String> = store
        .attendance_for_member(keep_id)?
        .into_iter()
        .map(|a| a.meeting_id)
        .collect();

    for record in store.attendance_for_member(duplicate_id)? {
        let entity = format!("attendance {}", record.id);
        if kept_meetings.contains(&record.meeting_id) {
            match store.delete_attendance(&record.id) {
                Ok(()) => outcome.attendance_deduped += 1,
                Err(e) => outcome.failures.push(FailureDetail::new(entity, e)),
            }
        } else {
            match store.update_attendance(&record.id, &record.meeting_id, keep_id) {
                Ok(()) => outcome.attendance_moved += 1,
                Err(e) => outcome.failures.push(FailureDetail::new(entity, e)),
            }
        }
    }

    if outcome.failures.is_empty() {
        match store.delete_member(duplicate_id) {
            Ok(()) => outcome.member_deleted = true,
            Err(e) => outcome
                .failures
                .push(FailureDetail::new(format!("member {}", duplicate_id), e)),
        }
    } else {
        tracing::warn!(
            duplicate = %duplicate_id,
            failures = outcome.failures.len(),
            "keeping duplicate member until every record has moved"
        );
    }

    // Aggregate
    let merged = store.find_entries(&EntryFilter::for_member(keep_id))?;
    let after = live_totals(&merged);
    if outcome.before.matches(&after, config.tolerance) {
        outcome.after = after;
    } else {
        match store.update_member_hours(keep_id, &after, Utc::now()) {
            Ok(()) => outcome.after = after,
            Err(e) => outcome
                .failures
                .push(FailureDetail::new(format!("member {} hours", keep_id), e)),
        }
    }

    let event = Event::new(
        "members_merged",
        "member",
        keep_id.as_str(),
        serde_json::json!({
            "duplicate": duplicate_id,
            "duplicate_name": duplicate.name,
            "entries_reassigned": outcome.entries_reassigned,
            "attendance_moved": outcome.attendance_moved,
            "attendance_deduped": outcome.attendance_deduped,
            "member_deleted": outcome.member_deleted,
            "before": outcome.before,
            "after": outcome.after,
        }),
        &config.actor,
    );
    if let Err(e) = store.record_event(&event) {
        tracing::warn!(member = %keep_id, error = %e, "failed to record merge event");
    }

    tracing::info!(keep = %keep_id, "{} -> {}", outcome.before, outcome.after);
    Ok(outcome)
}
