use crate::batch::BatchSummary;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::model::{AttendanceRecord, Event, Meeting, MemberId, SessionType};
use crate::store::{load_roster, RecordStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedError {
    pub member_id: MemberId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedOutcome {
    pub meeting_id: String,
    pub meeting_created: bool,
    pub created: usize,
    /// Members that already had attendance for the meeting
    pub skipped: usize,
    pub errors: Vec<SeedError>,
}

impl SeedOutcome {
    pub fn to_summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total_processed: self.created + self.skipped,
            succeeded: self.created,
            skipped: self.skipped,
            ..Default::default()
        };
        for error in &self.errors {
            summary.record_failure(format!("member {}", error.member_id), &error.reason);
        }
        summary
    }
}

/// Find the meeting on `date`, or create a closed one
pub(crate) fn meeting_for_date<S: RecordStore + ?Sized>(
    store: &mut S,
    date: NaiveDate,
    session_type: SessionType,
    config: &EngineConfig,
) -> EngineResult<(Meeting, bool)> {
    let mut existing = store.find_meetings_by_date(date)?;
    if !existing.is_empty() {
        if existing.len() > 1 {
            tracing::warn!(
                date = %date,
                meetings = existing.len(),
                "several meetings on this date, seeding the earliest; consider consolidating"
            );
        }
        return Ok((existing.remove(0), false));
    }

    let meeting = Meeting::new(date, &config.meeting_type, session_type, false);
    store.insert_meeting(&meeting)?;

    let event = Event::new(
        "meeting_created",
        "meeting",
        &meeting.id,
        serde_json::json!({
            "meeting_date": date,
            "meeting_type": meeting.meeting_type,
            "session_type": session_type,
        }),
        &config.actor,
    );
    if let Err(e) = store.record_event(&event) {
        tracing::warn!(meeting = %meeting.id, error = %e, "failed to record meeting event");
    }

    tracing::info!(date = %date, meeting = %meeting.id, "created meeting");
    Ok((meeting, true))
}

/// Give every member on the roster an attendance record for the meeting on
/// `date`, creating the meeting when needed.
///
/// Inserts run in batches; a failed batch marks each of its members as an
/// error and the next batch still runs. Re-running fills only the gaps.
pub fn seed_attendance<S: RecordStore + ?Sized>(
    store: &mut S,
    date: NaiveDate,
    session_type: SessionType,
    config: &EngineConfig,
) -> EngineResult<SeedOutcome> {
    let (meeting, meeting_created) = meeting_for_date(store, date, session_type, config)?;
    let roster = load_roster(&*store, config.page_size)?;
    let existing: HashSet<MemberId> = store
        .attendance_for_meeting(&meeting.id)?
        .into_iter()
        .map(|a| a.member_id)
        .collect();
    let throttle = config.throttle();

    let mut outcome = SeedOutcome {
        meeting_id: meeting.id.clone(),
        meeting_created,
        ..Default::default()
    };

    tracing::info!(
        meeting = %meeting.id,
        roster = roster.len(),
        existing = existing.len(),
        "seeding attendance"
    );

    for (n, batch) in roster.chunks(config.batch_size.max(1)).enumerate() {
        let missing: Vec<AttendanceRecord> = batch
            .iter()
            .filter(|m| !existing.contains(&m.id))
            .map(|m| AttendanceRecord::new(&meeting.id, &m.id, session_type))
            .collect();
        outcome.skipped += batch.len() - missing.len();

        if missing.is_empty() {
            continue;
        }

        match store.insert_attendance(&missing) {
            Ok(()) => {
                outcome.created += missing.len();
                tracing::debug!(batch = n + 1, created = missing.len(), "batch inserted");
            }
            Err(e) => {
                tracing::warn!(batch = n + 1, members = missing.len(), error = %e, "batch insert failed");
                let reason = e.to_string();
                outcome
                    .errors
                    .extend(missing.into_iter().map(|r| SeedError {
                        member_id: r.member_id,
                        reason: reason.clone(),
                    }));
            }
        }
        throttle.pause();
    }

    tracing::info!(
        created = outcome.created,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        "seeding finished"
    );
    Ok(outcome)
}
