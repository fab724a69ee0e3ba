use crate::batch::BatchSummary;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::model::{AttendanceRecord, MemberId, SessionType};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One response from the attendance sign-in form
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FormResponse {
    /// CSV line the response was read from
    #[serde(skip)]
    pub line: usize,

    #[serde(rename = "Timestamp", alias = "timestamp", default)]
    pub timestamp: String,

    #[serde(rename = "First Name", alias = "first_name", default)]
    pub first_name: String,

    #[serde(rename = "Last Name", alias = "last_name", default)]
    pub last_name: String,

    #[serde(rename = "S Number (No s)", alias = "member_id", default)]
    pub member_id: String,

    #[serde(rename = "Meeting Time", alias = "meeting_time", default)]
    pub meeting_time: String,
}

impl FormResponse {
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportError {
    pub line: usize,
    pub member_id: Option<MemberId>,
    pub reason: String,
}

/// Responses read from a form export, plus the lines that could not be read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormSheet {
    pub responses: Vec<FormResponse>,
    pub unreadable: Vec<ImportError>,
}

pub fn load_form_responses(csv_path: &Path) -> Result<FormSheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open attendance CSV {}", csv_path.display()))?;
    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read headers of {}", csv_path.display()))?
        .clone();

    let mut sheet = FormSheet::default();
    for (n, result) in rdr.records().enumerate() {
        let fallback_line = n + 2;
        let parsed = result.and_then(|mut record| {
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(fallback_line);
            // Forms drop trailing empty answers
            while record.len() < headers.len() {
                record.push_field("");
            }
            record
                .deserialize::<FormResponse>(Some(&headers))
                .map(|response| FormResponse { line, ..response })
        });
        match parsed {
            Ok(response) => sheet.responses.push(response),
            Err(e) => {
                tracing::warn!(line = fallback_line, error = %e, "unreadable attendance row");
                sheet.unreadable.push(ImportError {
                    line: fallback_line,
                    member_id: None,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(sheet)
}

/// Form ids are typed by hand: an optional leading "s", then digits with
/// stray spaces or punctuation in between.
pub fn normalize_form_id(raw: &str) -> Option<MemberId> {
    let lower = raw.trim().to_lowercase();
    let body = lower.strip_prefix('s').unwrap_or(&lower);
    let digits: String = body.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(MemberId::new(&digits))
    }
}

/// Date part of a form timestamp such as `12/8/2025 17:41:37`
pub fn parse_form_date(timestamp: &str) -> Option<NaiveDate> {
    let date = timestamp.split_whitespace().next()?;
    let parts: Vec<&str> = date.split('/').collect();
    if let [month, day, year] = parts.as_slice() {
        return NaiveDate::from_ymd_opt(
            year.parse().ok()?,
            month.parse().ok()?,
            day.parse().ok()?,
        );
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

pub fn session_from_meeting_time(meeting_time: &str) -> SessionType {
    let lower = meeting_time.to_lowercase();
    if lower.contains("morning") {
        SessionType::Morning
    } else if lower.contains("afternoon") {
        SessionType::Afternoon
    } else {
        SessionType::Both
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedMeeting {
    pub date: NaiveDate,
    pub meeting_id: String,
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub meetings: Vec<ImportedMeeting>,
    pub created: usize,
    /// Responses for members already recorded at the meeting
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

impl ImportOutcome {
    pub fn to_summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total_processed: self.created + self.skipped,
            succeeded: self.created,
            skipped: self.skipped,
            ..Default::default()
        };
        for error in &self.errors {
            let entity = match &error.member_id {
                Some(id) => format!("line {} (member {})", error.line, id),
                None => format!("line {}", error.line),
            };
            summary.record_failure(entity, &error.reason);
        }
        summary
    }
}

/// Record attendance from form responses, one meeting per response date.
///
/// Meetings are found or created closed. A response with a bad id or date, or
/// whose insert fails, becomes an error and the rest still run. Members
/// already recorded at the meeting are skipped, so a re-import adds nothing.
pub fn import_attendance<S: RecordStore + ?Sized>(
    store: &mut S,
    responses: &[FormResponse],
    config: &EngineConfig,
) -> EngineResult<ImportOutcome> {
    let mut outcome = ImportOutcome::default();
    let mut by_date: BTreeMap<NaiveDate, Vec<(&FormResponse, MemberId)>> = BTreeMap::new();

    for response in responses {
        let member_id = match normalize_form_id(&response.member_id) {
            Some(id) => id,
            None => {
                outcome.errors.push(ImportError {
                    line: response.line,
                    member_id: None,
                    reason: format!("invalid or missing member id for {:?}", response.name()),
                });
                continue;
            }
        };
        match parse_form_date(&response.timestamp) {
            Some(date) => by_date.entry(date).or_default().push((response, member_id)),
            None => outcome.errors.push(ImportError {
                line: response.line,
                member_id: Some(member_id),
                reason: format!("could not parse date from timestamp {:?}", response.timestamp),
            }),
        }
    }

    tracing::info!(
        responses = responses.len(),
        dates = by_date.len(),
        invalid = outcome.errors.len(),
        "importing attendance"
    );

    for (date, rows) in by_date {
        let (meeting, created) =
            super::seed::meeting_for_date(store, date, SessionType::Both, config)?;
        outcome.meetings.push(ImportedMeeting {
            date,
            meeting_id: meeting.id.clone(),
            created,
        });

        let mut attending: HashSet<MemberId> = store
            .attendance_for_meeting(&meeting.id)?
            .into_iter()
            .map(|a| a.member_id)
            .collect();

        for (response, member_id) in rows {
            if attending.contains(&member_id) {
                outcome.skipped += 1;
                continue;
            }
            let session = session_from_meeting_time(&response.meeting_time);
            let record = AttendanceRecord::new(&meeting.id, &member_id, session);
            match store.insert_attendance(std::slice::from_ref(&record)) {
                Ok(()) => {
                    outcome.created += 1;
                    attending.insert(member_id);
                }
                Err(e) => {
                    tracing::warn!(line = response.line, member = %member_id, error = %e, "attendance insert failed");
                    outcome.errors.push(ImportError {
                        line: response.line,
                        member_id: Some(member_id),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    tracing::info!(
        created = outcome.created,
        skipped = outcome.skipped,
        errors = outcome.errors.len(),
        "attendance import finished"
    );
    Ok(outcome)
}
