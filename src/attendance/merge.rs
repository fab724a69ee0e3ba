use crate::batch::{BatchSummary, FailureDetail};
use crate::error::{EngineError, EngineResult};
use crate::model::{Event, Meeting, MemberId};
use crate::store::RecordStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub source_meeting_id: String,
    pub target_meeting_id: String,
    /// Records reassigned to the target meeting
    pub moved: usize,
    /// Source records dropped because the member already attended the target
    pub deduped: usize,
    pub meeting_deleted: bool,
    pub failures: Vec<FailureDetail>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.moved == 0 && self.deduped == 0 && !self.meeting_deleted && self.failures.is_empty()
    }

    pub fn to_summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::new();
        for _ in 0..self.moved {
            summary.record_success();
        }
        for _ in 0..self.deduped {
            summary.record_skip();
        }
        summary.total_processed += self.failures.len();
        summary.failed += self.failures.len();
        summary.failure_details.extend(self.failures.iter().cloned());
        summary
    }
}

/// Fold the source meeting's attendance into the target meeting, then delete
/// the source meeting once it is empty.
///
/// A missing source meeting means a previous run already finished, so the
/// result is an empty outcome.
pub fn merge<S: RecordStore + ?Sized>(
    store: &mut S,
    source_meeting_id: &str,
    target_meeting_id: &str,
    actor: &str,
) -> EngineResult<MergeOutcome> {
    if source_meeting_id == target_meeting_id {
        return Err(EngineError::SameMeeting(source_meeting_id.to_string()));
    }

    let mut outcome = MergeOutcome {
        source_meeting_id: source_meeting_id.to_string(),
        target_meeting_id: target_meeting_id.to_string(),
        ..Default::default()
    };

    if store.get_meeting(target_meeting_id)?.is_none() {
        return Err(EngineError::MeetingNotFound(target_meeting_id.to_string()));
    }
    if store.get_meeting(source_meeting_id)?.is_none() {
        tracing::info!(source = source_meeting_id, "source meeting already gone, nothing to merge");
        return Ok(outcome);
    }

    let mut attending: HashSet<MemberId> = store
        .attendance_for_meeting(target_meeting_id)?
        .into_iter()
        .map(|a| a.member_id)
        .collect();

    for record in store.attendance_for_meeting(source_meeting_id)? {
        let entity = format!("attendance {}", record.id);

        if attending.contains(&record.member_id) {
            match store.delete_attendance(&record.id) {
                Ok(()) => outcome.deduped += 1,
                Err(e) => outcome.failures.push(FailureDetail::new(entity, e)),
            }
        } else {
            match store.update_attendance(&record.id, target_meeting_id, &record.member_id) {
                Ok(()) => {
                    outcome.moved += 1;
                    attending.insert(record.member_id);
                }
                Err(e) => outcome.failures.push(FailureDetail::new(entity, e)),
            }
        }
    }

    if store.attendance_for_meeting(source_meeting_id)?.is_empty() {
        match store.delete_meeting(source_meeting_id) {
            Ok(()) => outcome.meeting_deleted = true,
            Err(e) => outcome
                .failures
                .push(FailureDetail::new(format!("meeting {}", source_meeting_id), e)),
        }
    } else {
        tracing::warn!(
            source = source_meeting_id,
            failures = outcome.failures.len(),
            "source meeting still has attendance, keeping it"
        );
    }

    let event = Event::new(
        "meetings_merged",
        "meeting",
        target_meeting_id,
        serde_json::json!({
            "source": source_meeting_id,
            "moved": outcome.moved,
            "deduped": outcome.deduped,
            "meeting_deleted": outcome.meeting_deleted,
            "failures": outcome.failures.len(),
        }),
        actor,
    );
    if let Err(e) = store.record_event(&event) {
        tracing::warn!(meeting = target_meeting_id, error = %e, "failed to record merge event");
    }

    tracing::info!(
        source = source_meeting_id,
        into = target_meeting_id,
        moved = outcome.moved,
        deduped = outcome.deduped,
        deleted = outcome.meeting_deleted,
        "merged meetings"
    );
    Ok(outcome)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOutcome {
    pub date: Option<NaiveDate>,
    /// Meeting that survives; None when no meeting exists on the date
    pub canonical_meeting_id: Option<String>,
    pub merges: Vec<MergeOutcome>,
}

impl ConsolidationOutcome {
    pub fn to_summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::new();
        for merge in &self.merges {
            let part = merge.to_summary();
            summary.total_processed += part.total_processed;
            summary.succeeded += part.succeeded;
            summary.skipped += part.skipped;
            summary.failed += part.failed;
            summary.failure_details.extend(part.failure_details);
        }
        summary
    }
}

/// Merge every meeting on `date` into the one with the most attendance.
/// Ties go to the earliest created meeting, then the smallest id.
pub fn consolidate_date<S: RecordStore + ?Sized>(
    store: &mut S,
    date: NaiveDate,
    actor: &str,
) -> EngineResult<ConsolidationOutcome> {
    let meetings = store.find_meetings_by_date(date)?;
    let mut outcome = ConsolidationOutcome {
        date: Some(date),
        ..Default::default()
    };

    let mut ranked: Vec<(usize, Meeting)> = Vec::with_capacity(meetings.len());
    for meeting in meetings {
        let count = store.attendance_for_meeting(&meeting.id)?.len();
        ranked.push((count, meeting));
    }
    ranked.sort_by(|(count_a, a), (count_b, b)| {
        count_b
            .cmp(count_a)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut ranked = ranked.into_iter();
    let canonical = match ranked.next() {
        Some((_, meeting)) => meeting,
        None => return Ok(outcome),
    };

    for (_, duplicate) in ranked {
        outcome
            .merges
            .push(merge(store, &duplicate.id, &canonical.id, actor)?);
    }

    tracing::info!(
        date = %date,
        canonical = %canonical.id,
        merged = outcome.merges.len(),
        "consolidated meetings"
    );
    outcome.canonical_meeting_id = Some(canonical.id);
    Ok(outcome)
}
