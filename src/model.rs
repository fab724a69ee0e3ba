// 📒 Ledger Model - Members, ledger entries, meetings, attendance
//
// Provenance of synthetic entries is an explicit field (EntryOrigin).
// Event labels are descriptive text only, except during the one-time
// origin backfill of rows written before the origin column existed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// MEMBER IDENTITY
// ============================================================================

/// Normalized member identifier.
///
/// Identifiers are case-insensitive and may carry a non-numeric marker in
/// front of the numeric body (`s123456`, `S-123456`, `#123456`). All of them
/// normalize to `123456`. Identifiers whose tail is not all digits are only
/// lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MemberId(String);

impl MemberId {
    pub fn new(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();

        if let Some(pos) = lower.find(|c: char| c.is_ascii_digit()) {
            let (marker, body) = lower.split_at(pos);
            if !marker.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
                return MemberId(body.to_string());
            }
        }

        MemberId(lower)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for MemberId {
    fn from(raw: String) -> Self {
        MemberId::new(&raw)
    }
}

impl From<&str> for MemberId {
    fn from(raw: &str) -> Self {
        MemberId::new(raw)
    }
}

impl From<MemberId> for String {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// HOUR TOTALS
// ============================================================================

/// Volunteering / social / total triple. `total` is always derived.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HourTotals {
    pub volunteering: f64,
    pub social: f64,
    pub total: f64,
}

impl HourTotals {
    pub fn from_parts(volunteering: f64, social: f64) -> Self {
        HourTotals {
            volunteering,
            social,
            total: volunteering + social,
        }
    }

    pub fn get(&self, category: HourCategory) -> f64 {
        match category {
            HourCategory::Volunteering => self.volunteering,
            HourCategory::Social => self.social,
        }
    }

    /// Both categories agree within `tolerance`, and so does the total
    pub fn matches(&self, other: &HourTotals, tolerance: f64) -> bool {
        (self.volunteering - other.volunteering).abs() < tolerance
            && (self.social - other.social).abs() < tolerance
            && (self.total - other.total).abs() < tolerance
    }

    /// Total agrees with the sum of its parts
    pub fn is_conserved(&self, tolerance: f64) -> bool {
        (self.total - (self.volunteering + self.social)).abs() < tolerance
    }
}

impl fmt::Display for HourTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}V / {}S / {}T",
            format_hours(self.volunteering),
            format_hours(self.social),
            format_hours(self.total)
        )
    }
}

/// Render hours without trailing zeros ("7", "2.5")
pub fn format_hours(hours: f64) -> String {
    let rounded = (hours * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        let s = format!("{:.2}", rounded);
        s.trim_end_matches('0').to_string()
    }
}

// ============================================================================
// MEMBER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub volunteering_hours: f64,
    pub social_hours: f64,
    pub total_hours: f64,
    pub last_hour_update: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(id: &str, name: &str) -> Self {
        Member {
            id: MemberId::new(id),
            name: name.to_string(),
            volunteering_hours: 0.0,
            social_hours: 0.0,
            total_hours: 0.0,
            last_hour_update: None,
        }
    }

    /// Builder used by fixtures and imports: sets all three aggregate fields
    pub fn with_hours(mut self, volunteering: f64, social: f64) -> Self {
        self.volunteering_hours = volunteering;
        self.social_hours = social;
        self.total_hours = volunteering + social;
        self
    }

    pub fn totals(&self) -> HourTotals {
        HourTotals {
            volunteering: self.volunteering_hours,
            social: self.social_hours,
            total: self.total_hours,
        }
    }
}

// ============================================================================
// LEDGER ENTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HourCategory {
    Volunteering,
    Social,
}

impl HourCategory {
    pub const ALL: [HourCategory; 2] = [HourCategory::Volunteering, HourCategory::Social];

    pub fn as_str(&self) -> &'static str {
        match self {
            HourCategory::Volunteering => "volunteering",
            HourCategory::Social => "social",
        }
    }
}

impl FromStr for HourCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "volunteering" => Ok(HourCategory::Volunteering),
            "social" => Ok(HourCategory::Social),
            other => Err(format!("unknown hour category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Approved,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Approved => "approved",
            EntryStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(EntryStatus::Pending),
            "approved" => Ok(EntryStatus::Approved),
            "rejected" => Ok(EntryStatus::Rejected),
            other => Err(format!("unknown entry status '{}'", other)),
        }
    }
}

/// Who produced a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Real entry from the approval workflow
    Submitted,

    /// Historical hours regenerated from the legacy import
    LegacyImport,

    /// Adjustment entry from the prior scheme; never regenerated
    DeprecatedAdjustment,

    /// Dated bulk credit for hours earned at other events
    BulkCredit,
}

impl EntryOrigin {
    pub const LEGACY_IMPORT_LABEL: &'static str = "Previously Recorded Hours";
    pub const DEPRECATED_ADJUSTMENT_LABEL: &'static str =
        "Hours Adjustment - Added from CSV/Other Events";
    pub const BULK_CREDIT_LABEL: &'static str = "Hours Added from Other Events";

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryOrigin::Submitted => "submitted",
            EntryOrigin::LegacyImport => "legacy_import",
            EntryOrigin::DeprecatedAdjustment => "deprecated_adjustment",
            EntryOrigin::BulkCredit => "bulk_credit",
        }
    }

    pub fn is_synthetic(&self) -> bool {
        !matches!(self, EntryOrigin::Submitted)
    }

    /// Event label written on entries of this origin
    pub fn label(&self) -> Option<&'static str> {
        match self {
            EntryOrigin::Submitted => None,
            EntryOrigin::LegacyImport => Some(Self::LEGACY_IMPORT_LABEL),
            EntryOrigin::DeprecatedAdjustment => Some(Self::DEPRECATED_ADJUSTMENT_LABEL),
            EntryOrigin::BulkCredit => Some(Self::BULK_CREDIT_LABEL),
        }
    }

    /// Classify an event label written before origins were stored.
    /// Case-insensitive substring match against the reserved labels.
    pub fn from_event_label(label: &str) -> Self {
        let lower = label.to_lowercase();

        if lower.contains(&Self::LEGACY_IMPORT_LABEL.to_lowercase()) {
            EntryOrigin::LegacyImport
        } else if lower.contains(&Self::DEPRECATED_ADJUSTMENT_LABEL.to_lowercase()) {
            EntryOrigin::DeprecatedAdjustment
        } else if lower.contains(&Self::BULK_CREDIT_LABEL.to_lowercase()) {
            EntryOrigin::BulkCredit
        } else {
            EntryOrigin::Submitted
        }
    }
}

impl FromStr for EntryOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "submitted" => Ok(EntryOrigin::Submitted),
            "legacy_import" => Ok(EntryOrigin::LegacyImport),
            "deprecated_adjustment" => Ok(EntryOrigin::DeprecatedAdjustment),
            "bulk_credit" => Ok(EntryOrigin::BulkCredit),
            other => Err(format!("unknown entry origin '{}'", other)),
        }
    }
}

/// Individual award of hours to a member for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub member_id: MemberId,
    pub category: HourCategory,
    pub hours: f64,
    pub status: EntryStatus,
    pub event_label: String,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub description: String,
    pub origin: EntryOrigin,
}

impl LedgerEntry {
    /// A real, approved entry as produced by the approval workflow
    pub fn approved(
        member_id: &MemberId,
        category: HourCategory,
        hours: f64,
        event_label: &str,
        reviewed_at: DateTime<Utc>,
    ) -> Self {
        LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            member_id: member_id.clone(),
            category,
            hours,
            status: EntryStatus::Approved,
            event_label: event_label.to_string(),
            submitted_at: reviewed_at,
            reviewed_at: Some(reviewed_at),
            reviewed_by: None,
            description: String::new(),
            origin: EntryOrigin::Submitted,
        }
    }

    /// Approved synthetic entry of the given origin, reviewed by `System`
    pub fn synthetic(
        member_id: &MemberId,
        origin: EntryOrigin,
        category: HourCategory,
        hours: f64,
        description: String,
        at: DateTime<Utc>,
    ) -> Self {
        LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            member_id: member_id.clone(),
            category,
            hours,
            status: EntryStatus::Approved,
            event_label: origin.label().unwrap_or_default().to_string(),
            submitted_at: at,
            reviewed_at: Some(at),
            reviewed_by: Some("System".to_string()),
            description,
            origin,
        }
    }

    /// Approved entries are the only ones that count toward the aggregate
    pub fn is_live(&self) -> bool {
        self.status == EntryStatus::Approved
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin.is_synthetic()
    }

    /// Approved entry from the approval workflow
    pub fn is_real(&self) -> bool {
        self.is_live() && !self.is_synthetic()
    }
}

// ============================================================================
// MEETINGS & ATTENDANCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Morning,
    Afternoon,
    Both,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Morning => "morning",
            SessionType::Afternoon => "afternoon",
            SessionType::Both => "both",
        }
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Ok(SessionType::Morning),
            "afternoon" => Ok(SessionType::Afternoon),
            "both" => Ok(SessionType::Both),
            other => Err(format!("unknown session type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub meeting_date: NaiveDate,
    pub meeting_type: String,
    pub session_type: SessionType,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
}

impl Meeting {
    pub fn new(meeting_date: NaiveDate, meeting_type: &str, session_type: SessionType, is_open: bool) -> Self {
        Meeting {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_date,
            meeting_type: meeting_type.to_string(),
            session_type,
            is_open,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub meeting_id: String,
    pub member_id: MemberId,
    pub session_type: SessionType,
    pub submitted_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn new(meeting_id: &str, member_id: &MemberId, session_type: SessionType) -> Self {
        AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: meeting_id.to_string(),
            member_id: member_id.clone(),
            session_type,
            submitted_at: Utc::now(),
        }
    }
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Audit trail row: every engine write leaves one behind
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_strips_marker_and_case() {
        assert_eq!(MemberId::new("S123456"), MemberId::new("123456"));
        assert_eq!(MemberId::new("s123456").as_str(), "123456");
        assert_eq!(MemberId::new("  123456 ").as_str(), "123456");
        assert_eq!(MemberId::new("s-123").as_str(), "123");
        assert_eq!(MemberId::new("#123").as_str(), "123");
        assert_eq!(MemberId::new("S# 123").as_str(), "123");
    }

    #[test]
    fn test_member_id_without_numeric_body_is_lowercased() {
        assert_eq!(MemberId::new("Admin").as_str(), "admin");
        // Mixed bodies keep their marker
        assert_eq!(MemberId::new("ab12cd").as_str(), "ab12cd");
    }

    #[test]
    fn test_member_id_deserializes_normalized() {
        let id: MemberId = serde_json::from_str("\"S000042\"").unwrap();
        assert_eq!(id.as_str(), "000042");
    }

    #[test]
    fn test_origin_from_event_label() {
        assert_eq!(
            EntryOrigin::from_event_label("previously recorded hours"),
            EntryOrigin::LegacyImport
        );
        assert_eq!(
            EntryOrigin::from_event_label("Hours Adjustment - Added from CSV/Other Events (2)"),
            EntryOrigin::DeprecatedAdjustment
        );
        assert_eq!(
            EntryOrigin::from_event_label("Hours Added from Other Events"),
            EntryOrigin::BulkCredit
        );
        assert_eq!(
            EntryOrigin::from_event_label("Food Bank Saturday"),
            EntryOrigin::Submitted
        );
    }

    #[test]
    fn test_origin_round_trips_through_str() {
        for origin in [
            EntryOrigin::Submitted,
            EntryOrigin::LegacyImport,
            EntryOrigin::DeprecatedAdjustment,
            EntryOrigin::BulkCredit,
        ] {
            assert_eq!(origin.as_str().parse::<EntryOrigin>().unwrap(), origin);
        }
    }

    #[test]
    fn test_hour_totals_derive_total() {
        let totals = HourTotals::from_parts(7.0, 3.0);
        assert_eq!(totals.total, 10.0);
        assert!(totals.is_conserved(0.01));
        assert!(totals.matches(&HourTotals::from_parts(7.004, 3.0), 0.01));
        assert!(!totals.matches(&HourTotals::from_parts(7.5, 3.0), 0.01));
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_hours(7.0), "7");
        assert_eq!(format_hours(2.5), "2.5");
        assert_eq!(format_hours(1.25), "1.25");
    }

    #[test]
    fn test_real_entry_classification() {
        let member = MemberId::new("100");
        let now = Utc::now();
        let real = LedgerEntry::approved(&member, HourCategory::Social, 2.0, "Bake Sale", now);
        assert!(real.is_real());

        let synthetic = LedgerEntry::synthetic(
            &member,
            EntryOrigin::LegacyImport,
            HourCategory::Social,
            2.0,
            String::new(),
            now,
        );
        assert!(!synthetic.is_real());
        assert!(synthetic.is_synthetic());
        assert_eq!(synthetic.event_label, "Previously Recorded Hours");

        let mut pending = real.clone();
        pending.status = EntryStatus::Pending;
        assert!(!pending.is_real());
    }
}
