use super::{EntryFilter, Page, RecordStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    AttendanceRecord, EntryOrigin, Event, HourTotals, LedgerEntry, Meeting, Member, MemberId,
};
use crate::reconciliation::Correction;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;
use std::path::Path;

/// SQLite-backed record store (WAL mode, transactional corrections)
pub struct SqliteStore {
    conn: Connection,
}

/// Row counts per table, for run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub members: i64,
    pub ledger_entries: i64,
    pub meetings: i64,
    pub attendance: i64,
    pub events: i64,
}

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS members (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            volunteering_hours REAL NOT NULL DEFAULT 0,
            social_hours REAL NOT NULL DEFAULT 0,
            total_hours REAL NOT NULL DEFAULT 0,
            last_hour_update TEXT
        )",
        [],
    )?;

    // origin is NULL for rows written before provenance was stored;
    // migrate_entry_origins backfills it from the event label
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL,
            category TEXT NOT NULL,
            hours REAL NOT NULL,
            status TEXT NOT NULL,
            event_label TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            reviewed_at TEXT,
            reviewed_by TEXT,
            description TEXT NOT NULL DEFAULT '',
            origin TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meetings (
            id TEXT PRIMARY KEY,
            meeting_date TEXT NOT NULL,
            meeting_type TEXT NOT NULL,
            session_type TEXT NOT NULL,
            is_open INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance (
            id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL,
            member_id TEXT NOT NULL,
            session_type TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            UNIQUE (meeting_id, member_id)
        )",
        [],
    )?;

    // Audit trail
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_member ON ledger_entries(member_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meetings_date ON meetings(meeting_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_member ON attendance(member_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{}': {}", value, e)))
}

fn parse_optional_timestamp(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn parse_column<T: std::str::FromStr<Err = String>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value.parse::<T>().map_err(|e| conversion_error(idx, e))
}

const MEMBER_COLUMNS: &str =
    "id, name, volunteering_hours, social_hours, total_hours, last_hour_update";

fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    let id: String = row.get(0)?;
    Ok(Member {
        id: MemberId::new(&id),
        name: row.get(1)?,
        volunteering_hours: row.get(2)?,
        social_hours: row.get(3)?,
        total_hours: row.get(4)?,
        last_hour_update: parse_optional_timestamp(5, row.get(5)?)?,
    })
}

const ENTRY_COLUMNS: &str = "id, member_id, category, hours, status, event_label, \
     submitted_at, reviewed_at, reviewed_by, description, origin";

fn entry_from_row(row: &Row) -> rusqlite::Result<LedgerEntry> {
    let member_id: String = row.get(1)?;
    let category: String = row.get(2)?;
    let status: String = row.get(4)?;
    let event_label: String = row.get(5)?;
    let submitted_at: String = row.get(6)?;
    let origin: Option<String> = row.get(10)?;

    let origin = match origin {
        Some(value) => parse_column::<EntryOrigin>(10, &value)?,
        None => EntryOrigin::from_event_label(&event_label),
    };

    Ok(LedgerEntry {
        id: row.get(0)?,
        member_id: MemberId::new(&member_id),
        category: parse_column(2, &category)?,
        hours: row.get(3)?,
        status: parse_column(4, &status)?,
        event_label,
        submitted_at: parse_timestamp(6, &submitted_at)?,
        reviewed_at: parse_optional_timestamp(7, row.get(7)?)?,
        reviewed_by: row.get(8)?,
        description: row.get(9)?,
        origin,
    })
}

const MEETING_COLUMNS: &str = "id, meeting_date, meeting_type, session_type, is_open, created_at";

fn meeting_from_row(row: &Row) -> rusqlite::Result<Meeting> {
    let meeting_date: String = row.get(1)?;
    let session_type: String = row.get(3)?;
    let created_at: String = row.get(5)?;

    Ok(Meeting {
        id: row.get(0)?,
        meeting_date: NaiveDate::parse_from_str(&meeting_date, "%Y-%m-%d")
            .map_err(|e| conversion_error(1, format!("bad date '{}': {}", meeting_date, e)))?,
        meeting_type: row.get(2)?,
        session_type: parse_column(3, &session_type)?,
        is_open: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}

const ATTENDANCE_COLUMNS: &str = "id, meeting_id, member_id, session_type, submitted_at";

fn attendance_from_row(row: &Row) -> rusqlite::Result<AttendanceRecord> {
    let member_id: String = row.get(2)?;
    let session_type: String = row.get(3)?;
    let submitted_at: String = row.get(4)?;

    Ok(AttendanceRecord {
        id: row.get(0)?,
        meeting_id: row.get(1)?,
        member_id: MemberId::new(&member_id),
        session_type: parse_column(3, &session_type)?,
        submitted_at: parse_timestamp(4, &submitted_at)?,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let timestamp: String = row.get(1)?;
    let data_json: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: parse_timestamp(1, &timestamp)?,
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json)
            .map_err(|e| conversion_error(5, format!("bad event payload: {}", e)))?,
        actor: row.get(6)?,
    })
}

/// Map constraint violations to `Conflict`, everything else to `Database`
fn write_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, ref message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(message.clone().unwrap_or_else(|| failure.to_string()))
        }
        other => StoreError::Database(other),
    }
}

fn expect_one(changed: usize, what: String) -> StoreResult<()> {
    if changed == 0 {
        Err(StoreError::NotFound(what))
    } else {
        Ok(())
    }
}

// ============================================================================
// WRITE HELPERS (shared by plain and transactional paths)
// ============================================================================

fn insert_entry_on(conn: &Connection, entry: &LedgerEntry) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO ledger_entries (
            id, member_id, category, hours, status, event_label,
            submitted_at, reviewed_at, reviewed_by, description, origin
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id,
            entry.member_id.as_str(),
            entry.category.as_str(),
            entry.hours,
            entry.status.as_str(),
            entry.event_label,
            entry.submitted_at.to_rfc3339(),
            entry.reviewed_at.map(|dt| dt.to_rfc3339()),
            entry.reviewed_by,
            entry.description,
            entry.origin.as_str(),
        ],
    )
    .map_err(write_error)?;
    Ok(())
}

fn delete_entry_on(conn: &Connection, id: &str) -> StoreResult<()> {
    let changed = conn.execute("DELETE FROM ledger_entries WHERE id = ?1", params![id])?;
    expect_one(changed, format!("ledger entry {}", id))
}

fn update_hours_on(
    conn: &Connection,
    id: &MemberId,
    totals: &HourTotals,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE members
         SET volunteering_hours = ?1, social_hours = ?2, total_hours = ?3, last_hour_update = ?4
         WHERE id = ?5",
        params![
            totals.volunteering,
            totals.social,
            totals.total,
            at.to_rfc3339(),
            id.as_str()
        ],
    )?;
    expect_one(changed, format!("member {}", id))
}

/// WHERE clause and bound values for an entry filter
fn entry_filter_sql(filter: &EntryFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(member_id) = &filter.member_id {
        values.push(Box::new(member_id.as_str().to_string()));
        clauses.push(format!("member_id = ?{}", values.len()));
    }
    if let Some(status) = filter.status {
        values.push(Box::new(status.as_str()));
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(fragment) = &filter.label_contains {
        values.push(Box::new(fragment.clone()));
        clauses.push(format!("instr(lower(event_label), lower(?{})) > 0", values.len()));
    }
    if let Some(date) = filter.reviewed_on {
        values.push(Box::new(date.format("%Y-%m-%d").to_string()));
        clauses.push(format!("substr(reviewed_at, 1, 10) = ?{}", values.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    (where_clause, values)
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn counts(&self) -> StoreResult<StoreCounts> {
        let count = |table: &str| -> StoreResult<i64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };

        Ok(StoreCounts {
            members: count("members")?,
            ledger_entries: count("ledger_entries")?,
            meetings: count("meetings")?,
            attendance: count("attendance")?,
            events: count("events")?,
        })
    }

    /// Backfill `origin` for rows written before provenance was stored.
    /// Run once after upgrading an existing database.
    pub fn migrate_entry_origins(&mut self) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;

        let pending: Vec<(String, String)> = {
            let mut stmt =
                tx.prepare("SELECT id, event_label FROM ledger_entries WHERE origin IS NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (id, label) in &pending {
            let origin = EntryOrigin::from_event_label(label);
            tx.execute(
                "UPDATE ledger_entries SET origin = ?1 WHERE id = ?2",
                params![origin.as_str(), id],
            )?;
        }

        tx.commit()?;
        tracing::info!(updated = pending.len(), "backfilled ledger entry origins");
        Ok(pending.len())
    }

    fn query_members(&self, sql: &str, args: &[&dyn ToSql]) -> StoreResult<Vec<Member>> {
        let mut stmt = self.conn.prepare(sql)?;
        let members = stmt
            .query_map(args, member_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    fn query_attendance(&self, sql: &str, args: &[&dyn ToSql]) -> StoreResult<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(args, attendance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl RecordStore for SqliteStore {
    fn get_member(&self, id: &MemberId) -> StoreResult<Option<Member>> {
        let sql = format!("SELECT {} FROM members WHERE id = ?1", MEMBER_COLUMNS);
        Ok(self.query_members(&sql, &[&id.as_str()])?.into_iter().next())
    }

    fn list_members(&self, page: Page) -> StoreResult<Vec<Member>> {
        let sql = format!(
            "SELECT {} FROM members ORDER BY id ASC LIMIT ?1 OFFSET ?2",
            MEMBER_COLUMNS
        );
        self.query_members(&sql, &[&(page.limit as i64), &(page.offset as i64)])
    }

    fn search_members_by_name(&self, fragment: &str) -> StoreResult<Vec<Member>> {
        let sql = format!(
            "SELECT {} FROM members WHERE instr(lower(name), lower(?1)) > 0 ORDER BY id ASC",
            MEMBER_COLUMNS
        );
        self.query_members(&sql, &[&fragment])
    }

    fn insert_member(&mut self, member: &Member) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO members (
                    id, name, volunteering_hours, social_hours, total_hours, last_hour_update
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    member.id.as_str(),
                    member.name,
                    member.volunteering_hours,
                    member.social_hours,
                    member.total_hours,
                    member.last_hour_update.map(|dt| dt.to_rfc3339()),
                ],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn update_member_hours(
        &mut self,
        id: &MemberId,
        totals: &HourTotals,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        update_hours_on(&self.conn, id, totals, at)
    }

    fn delete_member(&mut self, id: &MemberId) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM members WHERE id = ?1", params![id.as_str()])?;
        expect_one(changed, format!("member {}", id))
    }

    fn find_entries(&self, filter: &EntryFilter) -> StoreResult<Vec<LedgerEntry>> {
        let (where_clause, values) = entry_filter_sql(filter);
        let sql = format!(
            "SELECT {} FROM ledger_entries{} ORDER BY submitted_at ASC, id ASC",
            ENTRY_COLUMNS, where_clause
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // Origin may be inferred from the label for unmigrated rows, so it
        // is filtered here rather than in SQL
        Ok(entries
            .into_iter()
            .filter(|e| filter.origin.map_or(true, |origin| e.origin == origin))
            .collect())
    }

    fn insert_entries(&mut self, entries: &[LedgerEntry]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        for entry in entries {
            insert_entry_on(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn reassign_entry(&mut self, id: &str, member_id: &MemberId) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE ledger_entries SET member_id = ?1 WHERE id = ?2",
            params![member_id.as_str(), id],
        )?;
        expect_one(changed, format!("ledger entry {}", id))
    }

    fn delete_entry(&mut self, id: &str) -> StoreResult<()> {
        delete_entry_on(&self.conn, id)
    }

    fn get_meeting(&self, id: &str) -> StoreResult<Option<Meeting>> {
        let sql = format!("SELECT {} FROM meetings WHERE id = ?1", MEETING_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let meetings = stmt
            .query_map(params![id], meeting_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meetings.into_iter().next())
    }

    fn find_meetings_by_date(&self, date: NaiveDate) -> StoreResult<Vec<Meeting>> {
        let sql = format!(
            "SELECT {} FROM meetings WHERE meeting_date = ?1 ORDER BY created_at ASC, id ASC",
            MEETING_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let meetings = stmt
            .query_map(params![date.format("%Y-%m-%d").to_string()], meeting_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meetings)
    }

    fn insert_meeting(&mut self, meeting: &Meeting) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO meetings (
                    id, meeting_date, meeting_type, session_type, is_open, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    meeting.id,
                    meeting.meeting_date.format("%Y-%m-%d").to_string(),
                    meeting.meeting_type,
                    meeting.session_type.as_str(),
                    meeting.is_open,
                    meeting.created_at.to_rfc3339(),
                ],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn delete_meeting(&mut self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM meetings WHERE id = ?1", params![id])?;
        expect_one(changed, format!("meeting {}", id))
    }

    fn attendance_for_meeting(&self, meeting_id: &str) -> StoreResult<Vec<AttendanceRecord>> {
        let sql = format!(
            "SELECT {} FROM attendance WHERE meeting_id = ?1 ORDER BY member_id ASC",
            ATTENDANCE_COLUMNS
        );
        self.query_attendance(&sql, &[&meeting_id])
    }

    fn attendance_for_member(&self, member_id: &MemberId) -> StoreResult<Vec<AttendanceRecord>> {
        let sql = format!(
            "SELECT {} FROM attendance WHERE member_id = ?1 ORDER BY submitted_at ASC",
            ATTENDANCE_COLUMNS
        );
        self.query_attendance(&sql, &[&member_id.as_str()])
    }

    fn insert_attendance(&mut self, records: &[AttendanceRecord]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO attendance (id, meeting_id, member_id, session_type, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.meeting_id,
                    record.member_id.as_str(),
                    record.session_type.as_str(),
                    record.submitted_at.to_rfc3339(),
                ],
            )
            .map_err(write_error)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update_attendance(
        &mut self,
        id: &str,
        meeting_id: &str,
        member_id: &MemberId,
    ) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE attendance SET meeting_id = ?1, member_id = ?2 WHERE id = ?3",
                params![meeting_id, member_id.as_str(), id],
            )
            .map_err(write_error)?;
        expect_one(changed, format!("attendance {}", id))
    }

    fn delete_attendance(&mut self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM attendance WHERE id = ?1", params![id])?;
        expect_one(changed, format!("attendance {}", id))
    }

    fn record_event(&mut self, event: &Event) -> StoreResult<()> {
        let data_json = serde_json::to_string(&event.data)?;

        self.conn.execute(
            "INSERT INTO events (
                event_id, timestamp, event_type, entity_type, entity_id, data, actor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.entity_type,
                event.entity_id,
                data_json,
                event.actor,
            ],
        )?;

        Ok(())
    }

    fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC",
        )?;

        let events = stmt
            .query_map(params![entity_type, entity_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// All three steps commit together or not at all
    fn apply_correction(&mut self, correction: &Correction) -> StoreResult<()> {
        let tx = self.conn.transaction()?;

        for id in &correction.delete_entry_ids {
            delete_entry_on(&tx, id)?;
        }
        update_hours_on(&tx, &correction.member_id, &correction.after, correction.computed_at)?;
        for entry in &correction.insert_entries {
            insert_entry_on(&tx, entry)?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryStatus, HourCategory, SessionType};
    use chrono::TimeZone;

    fn seeded_store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_member(&Member::new("s100", "Alice Sosa").with_hours(4.0, 1.0))
            .unwrap();
        store.insert_member(&Member::new("200", "Xuan Ho")).unwrap();
        store
    }

    #[test]
    fn test_member_round_trip_and_pagination() {
        let store = seeded_store();

        let alice = store.get_member(&MemberId::new("S100")).unwrap().unwrap();
        assert_eq!(alice.name, "Alice Sosa");
        assert_eq!(alice.total_hours, 5.0);

        let first = store.list_members(Page::first(1)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id.as_str(), "100");
        let second = store.list_members(Page::first(1).next()).unwrap();
        assert_eq!(second[0].id.as_str(), "200");

        let found = store.search_members_by_name("sOsA").unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_entry_filters_and_inferred_origin() {
        let mut store = seeded_store();
        let member = MemberId::new("100");
        let reviewed = Utc.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).unwrap();

        let real = LedgerEntry::approved(&member, HourCategory::Volunteering, 2.0, "Food Drive", reviewed);
        store.insert_entries(&[real.clone()]).unwrap();

        // A row written before the origin column existed
        store
            .conn
            .execute(
                "INSERT INTO ledger_entries (id, member_id, category, hours, status, event_label,
                    submitted_at, reviewed_at, reviewed_by, description, origin)
                 VALUES ('old-1', '100', 'social', 1.5, 'approved', 'Hours Added from Other Events',
                    ?1, ?1, 'System', '', NULL)",
                params![reviewed.to_rfc3339()],
            )
            .unwrap();

        let bulk = store
            .find_entries(&EntryFilter::for_member(&member).with_origin(EntryOrigin::BulkCredit))
            .unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].id, "old-1");

        let on_day = store
            .find_entries(
                &EntryFilter::default()
                    .with_status(EntryStatus::Approved)
                    .reviewed_on(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()),
            )
            .unwrap();
        assert_eq!(on_day.len(), 2);

        assert_eq!(store.migrate_entry_origins().unwrap(), 1);
        assert_eq!(store.migrate_entry_origins().unwrap(), 0);

        let labelled = store
            .find_entries(&EntryFilter::default().with_label_containing("other events"))
            .unwrap();
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].origin, EntryOrigin::BulkCredit);
    }

    #[test]
    fn test_attendance_uniqueness_rejects_whole_batch() {
        let mut store = seeded_store();
        let meeting = Meeting::new(
            NaiveDate::from_ymd_opt(2025, 12, 9).unwrap(),
            "General Meeting",
            SessionType::Both,
            false,
        );
        store.insert_meeting(&meeting).unwrap();

        let a = MemberId::new("100");
        let b = MemberId::new("200");
        store
            .insert_attendance(&[AttendanceRecord::new(&meeting.id, &a, SessionType::Both)])
            .unwrap();

        let err = store
            .insert_attendance(&[
                AttendanceRecord::new(&meeting.id, &b, SessionType::Both),
                AttendanceRecord::new(&meeting.id, &a, SessionType::Both),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.attendance_for_meeting(&meeting.id).unwrap().len(), 1);

        let by_date = store
            .find_meetings_by_date(NaiveDate::from_ymd_opt(2025, 12, 9).unwrap())
            .unwrap();
        assert_eq!(by_date, vec![meeting]);
    }

    #[test]
    fn test_correction_rolls_back_on_failure() {
        let mut store = seeded_store();
        let member = MemberId::new("100");
        let now = Utc::now();

        let legacy = LedgerEntry::synthetic(
            &member,
            EntryOrigin::LegacyImport,
            HourCategory::Volunteering,
            4.0,
            "previously recorded hours".to_string(),
            now,
        );
        let real = LedgerEntry::approved(&member, HourCategory::Social, 1.0, "Game Night", now);
        store.insert_entries(&[legacy.clone(), real.clone()]).unwrap();

        // The delete and the aggregate update succeed; the insert collides
        // with an existing id
        let mut colliding = LedgerEntry::synthetic(
            &member,
            EntryOrigin::LegacyImport,
            HourCategory::Volunteering,
            9.0,
            "previously recorded hours".to_string(),
            now,
        );
        colliding.id = real.id.clone();

        let correction = Correction {
            member_id: member.clone(),
            before: HourTotals::from_parts(4.0, 1.0),
            after: HourTotals::from_parts(9.0, 1.0),
            delete_entry_ids: vec![legacy.id.clone()],
            insert_entries: vec![colliding],
            legacy_fingerprint: None,
            computed_at: now,
        };

        assert!(matches!(
            store.apply_correction(&correction),
            Err(StoreError::Conflict(_))
        ));

        let alice = store.get_member(&member).unwrap().unwrap();
        assert_eq!(alice.totals(), HourTotals::from_parts(4.0, 1.0));
        let entries = store.find_entries(&EntryFilter::for_member(&member)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.id == legacy.id && e.hours == 4.0));
    }

    #[test]
    fn test_event_log() {
        let mut store = seeded_store();

        let event = Event::new(
            "aggregate_corrected",
            "member",
            "100",
            serde_json::json!({"after": 10.0}),
            "test_actor",
        );
        store.record_event(&event).unwrap();

        let events = store.events_for_entity("member", "100").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "aggregate_corrected");
        assert_eq!(events[0].actor, "test_actor");
    }
}
