// 🧪 In-memory record store with fault injection
//
// Mirrors the SQLite store's observable behaviour (ordering, uniqueness,
// all-or-nothing batch inserts) and can be told to fail specific operations.

use super::{EntryFilter, Page, RecordStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{AttendanceRecord, Event, HourTotals, LedgerEntry, Meeting, Member, MemberId};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
struct FaultPlan {
    /// Reads and aggregate writes for these members fail
    members: HashSet<MemberId>,
    /// Only `update_member_hours` fails for these members
    hour_updates: HashSet<MemberId>,
    entry_deletes: HashSet<String>,
    /// 1-based call numbers of `insert_attendance`
    attendance_batches: HashSet<usize>,
    attendance_updates: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    members: BTreeMap<MemberId, Member>,
    entries: Vec<LedgerEntry>,
    meetings: BTreeMap<String, Meeting>,
    attendance: Vec<AttendanceRecord>,
    events: Vec<Event>,
    faults: FaultPlan,
    attendance_insert_calls: usize,
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected failure: {}", what))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    pub fn fail_member(&mut self, id: &MemberId) {
        self.faults.members.insert(id.clone());
    }

    pub fn fail_hours_update(&mut self, id: &MemberId) {
        self.faults.hour_updates.insert(id.clone());
    }

    pub fn fail_entry_delete(&mut self, id: &str) {
        self.faults.entry_deletes.insert(id.to_string());
    }

    /// Fail the `call`-th invocation of `insert_attendance` (1-based)
    pub fn fail_attendance_batch(&mut self, call: usize) {
        self.faults.attendance_batches.insert(call);
    }

    pub fn fail_attendance_update(&mut self, id: &str) {
        self.faults.attendance_updates.insert(id.to_string());
    }

    pub fn clear_faults(&mut self) {
        self.faults = FaultPlan::default();
    }

    // ------------------------------------------------------------------------
    // Inspection helpers
    // ------------------------------------------------------------------------

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn attendance(&self) -> &[AttendanceRecord] {
        &self.attendance
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn meeting_count(&self) -> usize {
        self.meetings.len()
    }

    fn check_member(&self, id: &MemberId) -> StoreResult<()> {
        if self.faults.members.contains(id) {
            return Err(injected(&format!("member {}", id)));
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get_member(&self, id: &MemberId) -> StoreResult<Option<Member>> {
        self.check_member(id)?;
        Ok(self.members.get(id).cloned())
    }

    fn list_members(&self, page: Page) -> StoreResult<Vec<Member>> {
        Ok(self
            .members
            .values()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    fn search_members_by_name(&self, fragment: &str) -> StoreResult<Vec<Member>> {
        let needle = fragment.to_lowercase();
        Ok(self
            .members
            .values()
            .filter(|m| m.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    fn insert_member(&mut self, member: &Member) -> StoreResult<()> {
        if self.members.contains_key(&member.id) {
            return Err(StoreError::Conflict(format!("member {} exists", member.id)));
        }
        self.members.insert(member.id.clone(), member.clone());
        Ok(())
    }

    fn update_member_hours(
        &mut self,
        id: &MemberId,
        totals: &HourTotals,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check_member(id)?;
        if self.faults.hour_updates.contains(id) {
            return Err(injected(&format!("hours of member {}", id)));
        }
        let member = self
            .members
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("member {}", id)))?;
        member.volunteering_hours = totals.volunteering;
        member.social_hours = totals.social;
        member.total_hours = totals.total;
        member.last_hour_update = Some(at);
        Ok(())
    }

    fn delete_member(&mut self, id: &MemberId) -> StoreResult<()> {
        self.members
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("member {}", id)))
    }

    fn find_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<LedgerEntry>> {
        if let Some(member_id) = &filter.member_id {
            self.check_member(member_id)?;
        }
        Ok(self
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn insert_entries(&mut self, entries: &[LedgerEntry]) -> StoreResult<()> {
        for entry in entries {
            self.check_member(&entry.member_id)?;
            if self.entries.iter().any(|e| e.id == entry.id) {
                return Err(StoreError::Conflict(format!("ledger entry {} exists", entry.id)));
            }
        }
        self.entries.extend(entries.iter().cloned());
        Ok(())
    }

    fn reassign_entry(&mut self, id: &str, member_id: &MemberId) -> StoreResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("ledger entry {}", id)))?;
        entry.member_id = member_id.clone();
        Ok(())
    }

    fn delete_entry(&mut self, id: &str) -> StoreResult<()> {
        if self.faults.entry_deletes.contains(id) {
            return Err(injected(&format!("delete ledger entry {}", id)));
        }
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() == before {
            return Err(StoreError::NotFound(format!("ledger entry {}", id)));
        }
        Ok(())
    }

    fn get_meeting(&self, id: &str) -> StoreResult<Option<Meeting>> {
        Ok(self.meetings.get(id).cloned())
    }

    fn find_meetings_by_date(&self, date: NaiveDate) -> StoreResult<Vec<Meeting>> {
        let mut found: Vec<Meeting> = self
            .meetings
            .values()
            .filter(|m| m.meeting_date == date)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn insert_meeting(&mut self, meeting: &Meeting) -> StoreResult<()> {
        if self.meetings.contains_key(&meeting.id) {
            return Err(StoreError::Conflict(format!("meeting {} exists", meeting.id)));
        }
        self.meetings.insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    fn delete_meeting(&mut self, id: &str) -> StoreResult<()> {
        self.meetings
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("meeting {}", id)))
    }

    fn attendance_for_meeting(&self, meeting_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
        Ok(self
            .attendance
            .iter()
            .filter(|a| a.meeting_id == meeting_id)
            .cloned()
            .collect())
    }

    fn attendance_for_member(&self, member_id: &MemberId) -> StoreResult<Vec<AttendanceRecord>> {
        Ok(self
            .attendance
            .iter()
            .filter(|a| &a.member_id == member_id)
            .cloned()
            .collect())
    }

    fn insert_attendance(&mut self, records: &[AttendanceRecord]) -> StoreResult<()> {
        self.attendance_insert_calls += 1;
        if self
            .faults
            .attendance_batches
            .contains(&self.attendance_insert_calls)
        {
            return Err(injected(&format!(
                "attendance batch {}",
                self.attendance_insert_calls
            )));
        }

        let mut seen = HashSet::new();
        for record in records {
            let key = (record.meeting_id.as_str(), &record.member_id);
            let exists = self
                .attendance
                .iter()
                .any(|a| a.meeting_id == record.meeting_id && a.member_id == record.member_id);
            if exists || !seen.insert(key) {
                return Err(StoreError::Conflict(format!(
                    "attendance for member {} at meeting {} exists",
                    record.member_id, record.meeting_id
                )));
            }
        }

        self.attendance.extend(records.iter().cloned());
        Ok(())
    }

    fn update_attendance(
        &mut self,
        id: &str,
        meeting_id: &str,
        member_id: &MemberId,
    ) -> StoreResult<()> {
        if self.faults.attendance_updates.contains(id) {
            return Err(injected(&format!("update attendance {}", id)));
        }
        let clash = self.attendance.iter().any(|a| {
            a.id != id && a.meeting_id == meeting_id && &a.member_id == member_id
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "attendance for member {} at meeting {} exists",
                member_id, meeting_id
            )));
        }
        let record = self
            .attendance
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("attendance {}", id)))?;
        record.meeting_id = meeting_id.to_string();
        record.member_id = member_id.clone();
        Ok(())
    }

    fn delete_attendance(&mut self, id: &str) -> StoreResult<()> {
        let before = self.attendance.len();
        self.attendance.retain(|a| a.id != id);
        if self.attendance.len() == before {
            return Err(StoreError::NotFound(format!("attendance {}", id)));
        }
        Ok(())
    }

    fn record_event(&mut self, event: &Event) -> StoreResult<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }
}
