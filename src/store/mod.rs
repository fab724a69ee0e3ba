// 🗄️ Record Store - capability interface over the ledger backend
//
// Components never reach for a global client: a store handle is passed in
// explicitly, so tests can run everything against MemoryStore.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{setup_database, SqliteStore, StoreCounts};

use crate::error::StoreResult;
use crate::model::{
    AttendanceRecord, EntryOrigin, EntryStatus, Event, HourTotals, LedgerEntry,
    Meeting, Member, MemberId,
};
use crate::reconciliation::Correction;
use chrono::{DateTime, NaiveDate, Utc};

// ============================================================================
// QUERY TYPES
// ============================================================================

/// Range window for paginated reads (`offset..offset + limit`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Page { offset: 0, limit }
    }

    pub fn next(self) -> Self {
        Page {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Exact-match filter over ledger entries. `label_contains` is a
/// case-insensitive substring match. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub member_id: Option<MemberId>,
    pub status: Option<EntryStatus>,
    pub origin: Option<EntryOrigin>,
    pub label_contains: Option<String>,
    /// UTC calendar date of `reviewed_at`
    pub reviewed_on: Option<NaiveDate>,
}

impl EntryFilter {
    pub fn for_member(member_id: &MemberId) -> Self {
        EntryFilter {
            member_id: Some(member_id.clone()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_origin(mut self, origin: EntryOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_label_containing(mut self, fragment: &str) -> Self {
        self.label_contains = Some(fragment.to_string());
        self
    }

    pub fn reviewed_on(mut self, date: NaiveDate) -> Self {
        self.reviewed_on = Some(date);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(member_id) = &self.member_id {
            if &entry.member_id != member_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(origin) = self.origin {
            if entry.origin != origin {
                return false;
            }
        }
        if let Some(fragment) = &self.label_contains {
            if !entry
                .event_label
                .to_lowercase()
                .contains(&fragment.to_lowercase())
            {
                return false;
            }
        }
        if let Some(date) = self.reviewed_on {
            match entry.reviewed_at {
                Some(reviewed_at) if reviewed_at.date_naive() == date => {}
                _ => return false,
            }
        }
        true
    }
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Operations the engine needs from a record store.
///
/// Reads take `&self`, mutations `&mut self`. Every method reports failure
/// for that single operation; callers decide whether to skip or abort.
pub trait RecordStore {
    // --- members -----------------------------------------------------------

    fn get_member(&self, id: &MemberId) -> StoreResult<Option<Member>>;

    /// Members ordered by id, restricted to `page`
    fn list_members(&self, page: Page) -> StoreResult<Vec<Member>>;

    /// Case-insensitive substring match on the display name
    fn search_members_by_name(&self, fragment: &str) -> StoreResult<Vec<Member>>;

    fn insert_member(&mut self, member: &Member) -> StoreResult<()>;

    fn update_member_hours(
        &mut self,
        id: &MemberId,
        totals: &HourTotals,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn delete_member(&mut self, id: &MemberId) -> StoreResult<()>;

    // --- ledger ------------------------------------------------------------

    fn find_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<LedgerEntry>>;

    /// Insert-many; all or nothing
    fn insert_entries(&mut self, entries: &[LedgerEntry]) -> StoreResult<()>;

    fn reassign_entry(&mut self, id: &str, member_id: &MemberId) -> StoreResult<()>;

    fn delete_entry(&mut self, id: &str) -> StoreResult<()>;

    // --- meetings ----------------------------------------------------------

    fn get_meeting(&self, id: &str) -> StoreResult<Option<Meeting>>;

    fn find_meetings_by_date(&self, date: NaiveDate) -> StoreResult<Vec<Meeting>>;

    fn insert_meeting(&mut self, meeting: &Meeting) -> StoreResult<()>;

    fn delete_meeting(&mut self, id: &str) -> StoreResult<()>;

    // --- attendance --------------------------------------------------------

    fn attendance_for_meeting(&self, meeting_id: &str) -> StoreResult<Vec<AttendanceRecord>>;

    fn attendance_for_member(&self, member_id: &MemberId) -> StoreResult<Vec<AttendanceRecord>>;

    /// Insert-many; all or nothing. Violating the (meeting, member)
    /// uniqueness rejects the whole batch.
    fn insert_attendance(&mut self, records: &[AttendanceRecord]) -> StoreResult<()>;

    /// Update-by-id of the meeting and member references
    fn update_attendance(
        &mut self,
        id: &str,
        meeting_id: &str,
        member_id: &MemberId,
    ) -> StoreResult<()>;

    fn delete_attendance(&mut self, id: &str) -> StoreResult<()>;

    // --- audit -------------------------------------------------------------

    fn record_event(&mut self, event: &Event) -> StoreResult<()>;

    fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>>;

    // --- composite writes --------------------------------------------------

    /// Write a reconciliation correction: delete superseded synthetic
    /// entries, update the aggregate, insert the regenerated entries.
    ///
    /// The default runs the steps one after another. A crash in between
    /// leaves the member inconsistent until the next reconciliation pass.
    /// Transactional stores override this to make it atomic.
    fn apply_correction(&mut self, correction: &Correction) -> StoreResult<()> {
        for id in &correction.delete_entry_ids {
            self.delete_entry(id)?;
        }
        self.update_member_hours(&correction.member_id, &correction.after, correction.computed_at)?;
        self.insert_entries(&correction.insert_entries)?;
        Ok(())
    }
}

/// Read every page of a range-paginated source, stopping at the first
/// short page.
pub fn fetch_all_pages<T, F>(page_size: usize, mut fetch: F) -> StoreResult<Vec<T>>
where
    F: FnMut(Page) -> StoreResult<Vec<T>>,
{
    let mut page = Page::first(page_size.max(1));
    let mut all = Vec::new();

    loop {
        let batch = fetch(page)?;
        let len = batch.len();
        all.extend(batch);

        if len < page.limit {
            break;
        }
        tracing::debug!(fetched = all.len(), "fetched full page, continuing");
        page = page.next();
    }

    Ok(all)
}

/// Full member roster ordered by id
pub fn load_roster<S: RecordStore + ?Sized>(store: &S, page_size: usize) -> StoreResult<Vec<Member>> {
    fetch_all_pages(page_size, |page| store.list_members(page))
}
