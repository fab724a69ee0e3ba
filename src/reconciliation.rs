// ⚖️ Reconciliation Engine - keep member aggregates equal to the ledger
//
//   expected_volunteering = real_volunteering + adjusted_legacy_volunteering
//   expected_social       = real_social       + adjusted_legacy_social
//   expected_total        = expected_volunteering + expected_social
//
// "Real" means approved entries from the approval workflow. Legacy hours are
// represented on the ledger by at most one synthetic entry per category, and
// those entries are regenerated wholesale whenever anything drifts.

use crate::adjustments;
use crate::batch::{BatchSummary, FailureDetail};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::legacy::{LegacyIndex, LegacyRow};
use crate::model::{
    format_hours, EntryOrigin, Event, HourCategory, HourTotals, LedgerEntry, Member, MemberId,
};
use crate::store::{load_roster, EntryFilter, RecordStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// OVERLAP POLICY
// ============================================================================

/// How the legacy sheet's two columns relate.
///
/// The sheet this engine was built for already counted social hours inside
/// its volunteering column, so the overlap has to come out once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// volunteering = max(0, volunteering - social)
    #[default]
    SubtractSocial,

    /// Columns are disjoint; take both as-is
    Independent,
}

/// Legacy figures after the overlap policy has been applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegacyAdjustment {
    pub legacy_volunteering: f64,
    pub legacy_social: f64,
    /// Hours taken out of the volunteering column
    pub overlap: f64,
    pub volunteering: f64,
    pub social: f64,
}

impl OverlapPolicy {
    pub fn adjust(&self, legacy_volunteering: f64, legacy_social: f64) -> LegacyAdjustment {
        let volunteering = match self {
            OverlapPolicy::SubtractSocial => (legacy_volunteering - legacy_social).max(0.0),
            OverlapPolicy::Independent => legacy_volunteering,
        };

        LegacyAdjustment {
            legacy_volunteering,
            legacy_social,
            overlap: legacy_volunteering - volunteering,
            volunteering,
            social: legacy_social,
        }
    }
}

impl LegacyAdjustment {
    pub fn get(&self, category: HourCategory) -> f64 {
        match category {
            HourCategory::Volunteering => self.volunteering,
            HourCategory::Social => self.social,
        }
    }

    fn description(&self, category: HourCategory) -> String {
        let hours = self.get(category);
        let plural = hours != 1.0;
        let subject = match category {
            HourCategory::Volunteering => {
                format!("volunteering hour{}", if plural { "s" } else { "" })
            }
            HourCategory::Social => format!("social credit{}", if plural { "s" } else { "" }),
        };

        let mut text = format!(
            "These {} {} {} previously recorded and added from historical records. \
             Original sheet showed {} volunteering and {} social hours",
            format_hours(hours),
            subject,
            if plural { "were" } else { "was" },
            format_hours(self.legacy_volunteering),
            format_hours(self.legacy_social),
        );

        if category == HourCategory::Volunteering && self.overlap > 0.0 {
            text.push_str(&format!(
                "; volunteering adjusted by {} social credit{} to avoid double-counting",
                format_hours(self.overlap),
                if self.overlap == 1.0 { "" } else { "s" }
            ));
        }
        text.push('.');
        text
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

/// What the aggregate and ledger should look like for one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedHours {
    pub real: HourTotals,
    pub legacy: Option<LegacyAdjustment>,
    pub expected: HourTotals,
}

/// Writes that bring one member back in line with the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub member_id: MemberId,
    pub before: HourTotals,
    pub after: HourTotals,
    /// Every synthetic entry currently on the member's ledger
    pub delete_entry_ids: Vec<String>,
    /// Regenerated legacy entries (at most one per category)
    pub insert_entries: Vec<LedgerEntry>,
    pub legacy_fingerprint: Option<String>,
    pub computed_at: DateTime<Utc>,
}

impl Correction {
    pub fn summary(&self) -> String {
        format!(
            "member {}: {} -> {} ({} synthetic removed, {} regenerated)",
            self.member_id,
            self.before,
            self.after,
            self.delete_entry_ids.len(),
            self.insert_entries.len()
        )
    }

    fn to_event(&self, actor: &str) -> Event {
        Event::new(
            "aggregate_corrected",
            "member",
            self.member_id.as_str(),
            serde_json::json!({
                "before": self.before,
                "after": self.after,
                "deleted_entries": self.delete_entry_ids,
                "inserted_entries": self.insert_entries.iter().map(|e| &e.id).collect::<Vec<_>>(),
                "legacy_fingerprint": self.legacy_fingerprint,
            }),
            actor,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Aggregate and synthetic entries already agree with the ledger
    NoOp,
    Correct(Correction),
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, ReconcileOutcome::NoOp)
    }

    pub fn correction(&self) -> Option<&Correction> {
        match self {
            ReconcileOutcome::NoOp => None,
            ReconcileOutcome::Correct(c) => Some(c),
        }
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Tolerance for floating-point comparisons (default: 0.01 hours)
    pub tolerance: f64,

    pub policy: OverlapPolicy,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: 0.01,
            policy: OverlapPolicy::SubtractSocial,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        ReconciliationEngine {
            tolerance,
            ..Self::new()
        }
    }

    pub fn with_policy(policy: OverlapPolicy) -> Self {
        ReconciliationEngine {
            policy,
            ..Self::new()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        ReconciliationEngine {
            tolerance: config.tolerance,
            policy: config.overlap_policy,
        }
    }

    /// Sum approved, non-synthetic entries per category
    pub fn calculate_real(&self, entries: &[LedgerEntry]) -> HourTotals {
        let sum = |category: HourCategory| -> f64 {
            entries
                .iter()
                .filter(|e| e.is_real() && e.category == category)
                .map(|e| e.hours.max(0.0))
                .sum()
        };

        HourTotals::from_parts(sum(HourCategory::Volunteering), sum(HourCategory::Social))
    }

    pub fn expected_hours(&self, entries: &[LedgerEntry], legacy: Option<&LegacyRow>) -> ExpectedHours {
        let real = self.calculate_real(entries);
        let adjustment = legacy.map(|row| {
            let mut adjustment = self.policy.adjust(row.volunteering(), row.social());
            // Residues below tolerance get no synthetic entry, so they are not expected either
            if adjustment.volunteering < self.tolerance {
                adjustment.volunteering = 0.0;
            }
            if adjustment.social < self.tolerance {
                adjustment.social = 0.0;
            }
            adjustment
        });

        let (legacy_volunteering, legacy_social) = adjustment
            .map(|a| (a.volunteering, a.social))
            .unwrap_or((0.0, 0.0));

        ExpectedHours {
            real,
            legacy: adjustment,
            expected: HourTotals::from_parts(
                real.volunteering + legacy_volunteering,
                real.social + legacy_social,
            ),
        }
    }

    /// Compute what, if anything, must change for `member`.
    ///
    /// `entries` is the member's ledger. Pure: nothing is written.
    pub fn reconcile(
        &self,
        member: &Member,
        entries: &[LedgerEntry],
        legacy: Option<&LegacyRow>,
    ) -> ReconcileOutcome {
        self.reconcile_at(member, entries, legacy, Utc::now())
    }

    pub fn reconcile_at(
        &self,
        member: &Member,
        entries: &[LedgerEntry],
        legacy: Option<&LegacyRow>,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let expected = self.expected_hours(entries, legacy);
        let stored = member.totals();

        if stored.matches(&expected.expected, self.tolerance)
            && self.synthetic_entries_match(entries, expected.legacy.as_ref())
        {
            return ReconcileOutcome::NoOp;
        }

        let delete_entry_ids = entries
            .iter()
            .filter(|e| e.is_synthetic())
            .map(|e| e.id.clone())
            .collect();

        let insert_entries = expected
            .legacy
            .as_ref()
            .map(|adjustment| self.build_synthetic_entries(&member.id, adjustment, now))
            .unwrap_or_default();

        ReconcileOutcome::Correct(Correction {
            member_id: member.id.clone(),
            before: stored,
            after: expected.expected,
            delete_entry_ids,
            insert_entries,
            legacy_fingerprint: legacy.map(|row| row.fingerprint()),
            computed_at: now,
        })
    }

    /// Synthetic part of the ledger is exactly one live legacy entry per
    /// non-zero adjusted category, and nothing else
    fn synthetic_entries_match(&self, entries: &[LedgerEntry], adjustment: Option<&LegacyAdjustment>) -> bool {
        let synthetic: Vec<&LedgerEntry> = entries.iter().filter(|e| e.is_synthetic()).collect();

        let wanted: Vec<(HourCategory, f64)> = match adjustment {
            Some(a) => HourCategory::ALL
                .iter()
                .map(|&c| (c, a.get(c)))
                .filter(|(_, hours)| *hours >= self.tolerance)
                .collect(),
            None => Vec::new(),
        };

        if synthetic.len() != wanted.len() {
            return false;
        }

        wanted.iter().all(|(category, hours)| {
            synthetic.iter().any(|e| {
                e.origin == EntryOrigin::LegacyImport
                    && e.is_live()
                    && e.category == *category
                    && (e.hours - hours).abs() < self.tolerance
            })
        })
    }

    fn build_synthetic_entries(
        &self,
        member_id: &MemberId,
        adjustment: &LegacyAdjustment,
        now: DateTime<Utc>,
    ) -> Vec<LedgerEntry> {
        HourCategory::ALL
            .iter()
            .filter(|&&category| adjustment.get(category) >= self.tolerance)
            .map(|&category| {
                LedgerEntry::synthetic(
                    member_id,
                    EntryOrigin::LegacyImport,
                    category,
                    adjustment.get(category),
                    adjustment.description(category),
                    now,
                )
            })
            .collect()
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// STORE-BACKED OPERATIONS
// ============================================================================

/// Apply a correction and leave an audit event behind. The event is best
/// effort: a failed audit write is logged, not raised.
pub fn apply_correction<S: RecordStore + ?Sized>(
    store: &mut S,
    correction: &Correction,
    actor: &str,
) -> EngineResult<()> {
    store.apply_correction(correction)?;

    if let Err(e) = store.record_event(&correction.to_event(actor)) {
        tracing::warn!(member = %correction.member_id, error = %e, "failed to record correction event");
    }
    tracing::info!("{}", correction.summary());
    Ok(())
}

/// Load, reconcile and correct a single member
pub fn reconcile_member<S: RecordStore + ?Sized>(
    store: &mut S,
    member_id: &MemberId,
    legacy: Option<&LegacyRow>,
    config: &EngineConfig,
) -> EngineResult<ReconcileOutcome> {
    let member = store
        .get_member(member_id)?
        .ok_or_else(|| EngineError::MemberNotFound(member_id.to_string()))?;
    let entries = store.find_entries(&EntryFilter::for_member(member_id))?;

    let outcome = ReconciliationEngine::from_config(config).reconcile(&member, &entries, legacy);
    if let ReconcileOutcome::Correct(correction) = &outcome {
        apply_correction(store, correction, &config.actor)?;
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Compute and report, write nothing
    pub dry_run: bool,
}

/// One member whose aggregate was (or would be) rewritten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberChange {
    pub member_id: MemberId,
    pub before: HourTotals,
    pub after: HourTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// succeeded = corrected, skipped = already consistent
    pub summary: BatchSummary,
    pub changes: Vec<MemberChange>,
    pub duplicates_removed: usize,
}

/// Reconcile every member in the store against the ledger and legacy import.
///
/// Each member is deduped, reconciled and corrected independently; a failure
/// is recorded and the loop moves on. Only failing to read the roster aborts.
pub fn reconcile_all<S: RecordStore + ?Sized>(
    store: &mut S,
    legacy: &LegacyIndex,
    config: &EngineConfig,
    options: RunOptions,
) -> EngineResult<ReconcileReport> {
    let engine = ReconciliationEngine::from_config(config);
    let throttle = config.throttle();
    let roster = load_roster(&*store, config.page_size)?;
    let mut report = ReconcileReport::default();

    tracing::info!(
        members = roster.len(),
        legacy_rows = legacy.len(),
        dry_run = options.dry_run,
        "starting reconciliation"
    );

    for member in &roster {
        let entity = format!("member {}", member.id);

        let mut entries = match store.find_entries(&EntryFilter::for_member(&member.id)) {
            Ok(entries) => entries,
            Err(e) => {
                report.summary.record_failure(entity, e);
                continue;
            }
        };

        if !options.dry_run {
            let dedupe = adjustments::dedupe(store, &entries, &config.actor);
            report.duplicates_removed += dedupe.removed.len();
            if !dedupe.failed.is_empty() {
                let reasons: Vec<String> = dedupe.failed.iter().map(|f| f.reason.clone()).collect();
                report.summary.record_failure(entity, reasons.join("; "));
                continue;
            }
            let removed: HashSet<&String> = dedupe.removed.iter().collect();
            entries.retain(|e| !removed.contains(&e.id));
        }

        match engine.reconcile(member, &entries, legacy.get(&member.id)) {
            ReconcileOutcome::NoOp => report.summary.record_skip(),
            ReconcileOutcome::Correct(correction) => {
                if !options.dry_run {
                    if let Err(e) = apply_correction(store, &correction, &config.actor) {
                        report.summary.record_failure(entity, e);
                        throttle.pause();
                        continue;
                    }
                    throttle.pause();
                }
                report.changes.push(MemberChange {
                    member_id: correction.member_id,
                    before: correction.before,
                    after: correction.after,
                });
                report.summary.record_success();
            }
        }
    }

    let known: HashSet<&MemberId> = roster.iter().map(|m| &m.id).collect();
    for member_id in legacy.members() {
        if !known.contains(member_id) {
            report
                .summary
                .record_failure(format!("legacy row {}", member_id), "member not found");
        }
    }

    tracing::info!(
        corrected = report.changes.len(),
        duplicates_removed = report.duplicates_removed,
        "{}",
        report.summary
    );
    Ok(report)
}

// ============================================================================
// VERIFICATION (read-only)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub member_id: MemberId,
    pub name: String,
    pub stored: HourTotals,
    pub expected: HourTotals,
    /// expected total minus stored total
    pub difference: f64,
    /// Synthetic entries disagree with the legacy import even if the
    /// aggregate happens to match
    pub synthetic_drift: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub failures: Vec<FailureDetail>,
}

impl VerificationReport {
    pub fn is_balanced(&self) -> bool {
        self.discrepancies.is_empty() && self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Verified {} members: {} discrepancies, {} unreadable",
            self.checked,
            self.discrepancies.len(),
            self.failures.len()
        )
    }
}

/// Report every member whose stored figures disagree with the ledger
pub fn verify_all<S: RecordStore + ?Sized>(
    store: &S,
    legacy: &LegacyIndex,
    config: &EngineConfig,
) -> EngineResult<VerificationReport> {
    let engine = ReconciliationEngine::from_config(config);
    let roster = load_roster(store, config.page_size)?;
    let mut report = VerificationReport::default();

    for member in &roster {
        let entries = match store.find_entries(&EntryFilter::for_member(&member.id)) {
            Ok(entries) => entries,
            Err(e) => {
                report
                    .failures
                    .push(FailureDetail::new(format!("member {}", member.id), e));
                continue;
            }
        };
        report.checked += 1;

        let row = legacy.get(&member.id);
        if engine.reconcile(member, &entries, row).is_noop() {
            continue;
        }

        let expected = engine.expected_hours(&entries, row);
        let stored = member.totals();
        report.discrepancies.push(Discrepancy {
            member_id: member.id.clone(),
            name: member.name.clone(),
            stored,
            expected: expected.expected,
            difference: expected.expected.total - stored.total,
            synthetic_drift: stored.matches(&expected.expected, engine.tolerance),
        });
    }

    tracing::info!("{}", report.summary());
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryStatus;
    use crate::store::MemoryStore;

    fn member(volunteering: f64, social: f64) -> Member {
        Member::new("s100", "Alice Sosa").with_hours(volunteering, social)
    }

    fn real(category: HourCategory, hours: f64) -> LedgerEntry {
        LedgerEntry::approved(&MemberId::new("100"), category, hours, "Food Drive", Utc::now())
    }

    /// Store the correction's effect on a member and its ledger in memory
    fn apply_locally(member: &mut Member, entries: &mut Vec<LedgerEntry>, correction: &Correction) {
        entries.retain(|e| !correction.delete_entry_ids.contains(&e.id));
        entries.extend(correction.insert_entries.iter().cloned());
        member.volunteering_hours = correction.after.volunteering;
        member.social_hours = correction.after.social;
        member.total_hours = correction.after.total;
    }

    #[test]
    fn test_no_double_count() {
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");

        let outcome = engine.reconcile(&member(0.0, 0.0), &[], Some(&legacy));
        let correction = outcome.correction().expect("correction");

        assert_eq!(correction.after, HourTotals::from_parts(7.0, 3.0));
        assert_eq!(correction.after.total, 10.0);
        assert_eq!(correction.insert_entries.len(), 2);

        let vol = correction
            .insert_entries
            .iter()
            .find(|e| e.category == HourCategory::Volunteering)
            .unwrap();
        assert_eq!(vol.hours, 7.0);
        assert_eq!(vol.origin, EntryOrigin::LegacyImport);
        assert_eq!(vol.status, EntryStatus::Approved);
        assert!(vol.description.contains("10 volunteering and 3 social"));
        assert!(vol.description.contains("adjusted by 3 social credits"));
    }

    #[test]
    fn test_overlap_clamp() {
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "2", "5");

        let outcome = engine.reconcile(&member(0.0, 0.0), &[], Some(&legacy));
        let correction = outcome.correction().unwrap();

        assert_eq!(correction.after, HourTotals::from_parts(0.0, 5.0));
        assert_eq!(correction.insert_entries.len(), 1);
        assert_eq!(correction.insert_entries[0].category, HourCategory::Social);
        assert_eq!(correction.insert_entries[0].hours, 5.0);
    }

    #[test]
    fn test_independent_policy_keeps_both_columns() {
        let engine = ReconciliationEngine::with_policy(OverlapPolicy::Independent);
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");

        let outcome = engine.reconcile(&member(0.0, 0.0), &[], Some(&legacy));
        assert_eq!(outcome.correction().unwrap().after.total, 13.0);
    }

    #[test]
    fn test_real_entries_plus_legacy() {
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");
        let mut rejected = real(HourCategory::Volunteering, 50.0);
        rejected.status = EntryStatus::Rejected;
        let entries = vec![
            real(HourCategory::Volunteering, 2.5),
            real(HourCategory::Social, 1.0),
            rejected,
        ];

        let expected = engine.expected_hours(&entries, Some(&legacy));
        assert_eq!(expected.real, HourTotals::from_parts(2.5, 1.0));
        assert_eq!(expected.expected, HourTotals::from_parts(9.5, 4.0));
    }

    #[test]
    fn test_idempotent_second_pass_is_noop() {
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");
        let mut alice = member(12.0, 0.0);
        let mut entries = vec![real(HourCategory::Volunteering, 1.0)];

        let first = engine.reconcile(&alice, &entries, Some(&legacy));
        apply_locally(&mut alice, &mut entries, first.correction().unwrap());

        let second = engine.reconcile(&alice, &entries, Some(&legacy));
        assert!(second.is_noop());
        assert!(alice.totals().is_conserved(0.01));
    }

    #[test]
    fn test_tolerance_absorbs_rounding() {
        let engine = ReconciliationEngine::new();
        let entries = vec![
            real(HourCategory::Volunteering, 0.1),
            real(HourCategory::Volunteering, 0.2),
        ];
        let alice = member(0.3, 0.0);

        assert!(engine.reconcile(&alice, &entries, None).is_noop());
    }

    #[test]
    fn test_conservation_violation_triggers_correction() {
        let engine = ReconciliationEngine::new();
        let entries = vec![real(HourCategory::Volunteering, 4.0)];
        let mut alice = member(4.0, 0.0);
        alice.total_hours = 9.0;

        let outcome = engine.reconcile(&alice, &entries, None);
        assert_eq!(outcome.correction().unwrap().after.total, 4.0);
    }

    #[test]
    fn test_stray_synthetic_entry_triggers_regeneration() {
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");
        let id = MemberId::new("100");
        let now = Utc::now();

        // Aggregate already right, but a prior-scheme entry lingers
        let entries = vec![
            LedgerEntry::synthetic(&id, EntryOrigin::LegacyImport, HourCategory::Volunteering, 7.0, String::new(), now),
            LedgerEntry::synthetic(&id, EntryOrigin::LegacyImport, HourCategory::Social, 3.0, String::new(), now),
            LedgerEntry::synthetic(&id, EntryOrigin::DeprecatedAdjustment, HourCategory::Volunteering, 4.0, String::new(), now),
        ];

        let outcome = engine.reconcile(&member(7.0, 3.0), &entries, Some(&legacy));
        let correction = outcome.correction().unwrap();
        assert_eq!(correction.delete_entry_ids.len(), 3);
        assert_eq!(correction.insert_entries.len(), 2);
        assert_eq!(correction.after, HourTotals::from_parts(7.0, 3.0));
    }

    #[test]
    fn test_missing_synthetic_entries_are_restored() {
        // A crash after the aggregate write but before the inserts
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");

        let outcome = engine.reconcile(&member(7.0, 3.0), &[], Some(&legacy));
        assert_eq!(outcome.correction().unwrap().insert_entries.len(), 2);
    }

    #[test]
    fn test_no_legacy_row_drops_synthetic_entries() {
        let engine = ReconciliationEngine::new();
        let id = MemberId::new("100");
        let entries = vec![
            real(HourCategory::Social, 2.0),
            LedgerEntry::synthetic(&id, EntryOrigin::BulkCredit, HourCategory::Volunteering, 5.0, String::new(), Utc::now()),
        ];

        let outcome = engine.reconcile(&member(5.0, 2.0), &entries, None);
        let correction = outcome.correction().unwrap();
        assert_eq!(correction.after, HourTotals::from_parts(0.0, 2.0));
        assert_eq!(correction.delete_entry_ids.len(), 1);
        assert!(correction.insert_entries.is_empty());
        assert!(correction.legacy_fingerprint.is_none());
    }

    #[test]
    fn test_reconcile_all_against_memory_store() {
        let mut store = MemoryStore::new();
        store.insert_member(&member(0.0, 0.0)).unwrap();
        store.insert_member(&Member::new("200", "Xuan Ho")).unwrap();
        store.insert_member(&Member::new("300", "Sophia Kelly").with_hours(1.0, 0.0)).unwrap();
        store
            .insert_entries(&[LedgerEntry::approved(
                &MemberId::new("300"),
                HourCategory::Volunteering,
                1.0,
                "Library Shelving",
                Utc::now(),
            )])
            .unwrap();

        let legacy = LegacyIndex::from_rows(vec![
            LegacyRow::new("S100", "Alice Sosa", "10", "3"),
            LegacyRow::new("999", "Ghost", "4", "0"),
        ]);
        let config = EngineConfig::unthrottled();

        let report = reconcile_all(&mut store, &legacy, &config, RunOptions::default()).unwrap();
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.skipped, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.failure_details[0].entity, "legacy row 999");

        let alice = store.get_member(&MemberId::new("100")).unwrap().unwrap();
        assert_eq!(alice.totals(), HourTotals::from_parts(7.0, 3.0));
        assert!(alice.last_hour_update.is_some());
        assert_eq!(store.events().len(), 1);

        let again = reconcile_all(&mut store, &legacy, &config, RunOptions::default()).unwrap();
        assert_eq!(again.summary.succeeded, 0);
        assert!(again.changes.is_empty());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let mut store = MemoryStore::new();
        store.insert_member(&member(0.0, 0.0)).unwrap();
        let legacy = LegacyIndex::from_rows(vec![LegacyRow::new("100", "Alice", "10", "3")]);

        let report = reconcile_all(
            &mut store,
            &legacy,
            &EngineConfig::unthrottled(),
            RunOptions { dry_run: true },
        )
        .unwrap();

        assert_eq!(report.changes.len(), 1);
        assert!(store.entries().is_empty());
        assert_eq!(
            store.get_member(&MemberId::new("100")).unwrap().unwrap().total_hours,
            0.0
        );
    }

    #[test]
    fn test_store_failure_isolated_to_member() {
        let mut store = MemoryStore::new();
        store.insert_member(&member(0.0, 0.0)).unwrap();
        store.insert_member(&Member::new("200", "Xuan Ho")).unwrap();
        store.fail_member(&MemberId::new("100"));

        let legacy = LegacyIndex::from_rows(vec![
            LegacyRow::new("100", "Alice", "10", "3"),
            LegacyRow::new("200", "Xuan", "4", "1"),
        ]);

        let report = reconcile_all(&mut store, &legacy, &EngineConfig::unthrottled(), RunOptions::default())
            .unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(
            store.get_member(&MemberId::new("200")).unwrap().unwrap().totals(),
            HourTotals::from_parts(3.0, 1.0)
        );
    }

    #[test]
    fn test_verify_reports_without_writing() {
        let mut store = MemoryStore::new();
        store.insert_member(&member(12.0, 3.0)).unwrap();
        let legacy = LegacyIndex::from_rows(vec![LegacyRow::new("100", "Alice", "10", "3")]);

        let report = verify_all(&store, &legacy, &EngineConfig::unthrottled()).unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.discrepancies.len(), 1);
        assert!((report.discrepancies[0].difference + 5.0).abs() < 0.001);
        assert!(!report.discrepancies[0].synthetic_drift);
        assert!(!report.is_balanced());
    }

    #[test]
    fn test_sub_tolerance_residue_is_not_expected() {
        let engine = ReconciliationEngine::new();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10.005", "10");

        let expected = engine.expected_hours(&[], Some(&legacy));
        assert_eq!(expected.expected, HourTotals::from_parts(0.0, 10.0));
        assert_eq!(expected.legacy.unwrap().volunteering, 0.0);

        let mut alice = member(0.0, 0.0);
        let mut entries = Vec::new();
        let outcome = engine.reconcile(&alice, &entries, Some(&legacy));
        let correction = outcome.correction().unwrap();
        assert_eq!(correction.after.volunteering, 0.0);
        assert_eq!(correction.insert_entries.len(), 1);

        apply_locally(&mut alice, &mut entries, correction);
        assert!(engine.reconcile(&alice, &entries, Some(&legacy)).is_noop());
    }

    #[test]
    fn test_reconcile_member_corrects_one_member() {
        let mut store = MemoryStore::new();
        store.insert_member(&member(0.0, 0.0)).unwrap();
        store.insert_member(&Member::new("200", "Xuan Ho").with_hours(5.0, 0.0)).unwrap();
        let legacy = LegacyRow::new("100", "Alice Sosa", "10", "3");
        let config = EngineConfig::unthrottled();

        let outcome = reconcile_member(&mut store, &MemberId::new("S100"), Some(&legacy), &config).unwrap();
        assert_eq!(outcome.correction().unwrap().after, HourTotals::from_parts(7.0, 3.0));
        assert_eq!(
            store.get_member(&MemberId::new("100")).unwrap().unwrap().totals(),
            HourTotals::from_parts(7.0, 3.0)
        );
        assert_eq!(store.entries().len(), 2);
        assert_eq!(store.events().len(), 1);

        // Other members are left alone
        assert_eq!(store.get_member(&MemberId::new("200")).unwrap().unwrap().total_hours, 5.0);

        let again = reconcile_member(&mut store, &MemberId::new("100"), Some(&legacy), &config).unwrap();
        assert!(again.is_noop());

        assert!(matches!(
            reconcile_member(&mut store, &MemberId::new("999"), None, &config),
            Err(EngineError::MemberNotFound(_))
        ));
    }
}
