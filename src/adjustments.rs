// 🧹 Adjustment Entry Manager - Keep synthetic ledger entries unique
//
// Two cleanups over a member's ledger:
//   1. Superseded: more than one live legacy entry in a category (keep newest)
//   2. Deprecated: entries from the prior adjustment scheme (always removed)
// Plus removal of a dated bulk-credit batch across all members.

use crate::batch::{BatchSummary, FailureDetail};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::model::{EntryOrigin, Event, HourCategory, HourTotals, LedgerEntry, MemberId};
use crate::store::{load_roster, EntryFilter, RecordStore};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// ============================================================================
// DEDUPE PLAN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundancyReason {
    /// A newer live legacy entry exists in the same category
    Superseded,

    /// Written by the prior adjustment scheme
    DeprecatedScheme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundantEntry {
    pub entry_id: String,
    pub member_id: MemberId,
    pub reason: RedundancyReason,
    /// Entry that survives in place of this one
    pub kept: Option<String>,
}

/// Newest first: reviewed_at (missing sorts oldest), then submitted_at, then id
fn newest_first(a: &LedgerEntry, b: &LedgerEntry) -> Ordering {
    b.reviewed_at
        .cmp(&a.reviewed_at)
        .then_with(|| b.submitted_at.cmp(&a.submitted_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Every synthetic entry in `entries` that must go, with the reason
pub fn find_redundant(entries: &[LedgerEntry]) -> Vec<RedundantEntry> {
    let mut redundant = Vec::new();
    let mut live_legacy: BTreeMap<(&MemberId, HourCategory), Vec<&LedgerEntry>> = BTreeMap::new();

    for entry in entries {
        match entry.origin {
            EntryOrigin::DeprecatedAdjustment => redundant.push(RedundantEntry {
                entry_id: entry.id.clone(),
                member_id: entry.member_id.clone(),
                reason: RedundancyReason::DeprecatedScheme,
                kept: None,
            }),
            EntryOrigin::LegacyImport if entry.is_live() => live_legacy
                .entry((&entry.member_id, entry.category))
                .or_default()
                .push(entry),
            _ => {}
        }
    }

    for group in live_legacy.values_mut() {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| newest_first(a, b));
        let kept = group[0];

        for stale in &group[1..] {
            redundant.push(RedundantEntry {
                entry_id: stale.id.clone(),
                member_id: stale.member_id.clone(),
                reason: RedundancyReason::Superseded,
                kept: Some(kept.id.clone()),
            });
        }
    }

    redundant
}

/// Ids of the entries `dedupe` would delete
pub fn plan_dedupe(entries: &[LedgerEntry]) -> Vec<String> {
    find_redundant(entries)
        .into_iter()
        .map(|r| r.entry_id)
        .collect()
}

// ============================================================================
// DEDUPE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupeOutcome {
    pub removed: Vec<String>,
    pub failed: Vec<FailureDetail>,
}

/// Delete redundant synthetic entries from a member's ledger.
///
/// A failed delete is recorded and the rest still run.
pub fn dedupe<S: RecordStore + ?Sized>(
    store: &mut S,
    member_entries: &[LedgerEntry],
    actor: &str,
) -> DedupeOutcome {
    let mut outcome = DedupeOutcome::default();
    let redundant = find_redundant(member_entries);

    for entry in &redundant {
        match store.delete_entry(&entry.entry_id) {
            Ok(()) => outcome.removed.push(entry.entry_id.clone()),
            Err(e) => {
                tracing::warn!(entry = %entry.entry_id, error = %e, "failed to delete redundant entry");
                outcome
                    .failed
                    .push(FailureDetail::new(format!("ledger entry {}", entry.entry_id), e));
            }
        }
    }

    if let Some(first) = redundant.first() {
        let event = Event::new(
            "synthetic_entries_deduped",
            "member",
            first.member_id.as_str(),
            serde_json::json!({
                "removed": outcome.removed,
                "failed": outcome.failed.len(),
                "entries": redundant,
            }),
            actor,
        );
        if let Err(e) = store.record_event(&event) {
            tracing::warn!(member = %first.member_id, error = %e, "failed to record dedupe event");
        }
    }

    outcome
}

/// Dedupe every member on the roster
pub fn dedupe_all<S: RecordStore + ?Sized>(
    store: &mut S,
    config: &EngineConfig,
) -> EngineResult<BatchSummary> {
    let roster = load_roster(&*store, config.page_size)?;
    let throttle = config.throttle();
    let mut summary = BatchSummary::new();

    for member in &roster {
        let entity = format!("member {}", member.id);
        let entries = match store.find_entries(&EntryFilter::for_member(&member.id)) {
            Ok(entries) => entries,
            Err(e) => {
                summary.record_failure(entity, e);
                continue;
            }
        };

        if find_redundant(&entries).is_empty() {
            summary.record_skip();
            continue;
        }

        let outcome = dedupe(store, &entries, &config.actor);
        if outcome.failed.is_empty() {
            summary.record_success();
        } else {
            let reasons: Vec<String> = outcome.failed.iter().map(|f| f.to_string()).collect();
            summary.record_failure(entity, reasons.join("; "));
        }
        throttle.pause();
    }

    tracing::info!("{}", summary);
    Ok(summary)
}

// ============================================================================
// BULK CREDIT REMOVAL
// ============================================================================

/// Remove every bulk-credit entry reviewed on `review_date` (UTC) and take the
/// hours back out of each member's aggregate, clamped at zero.
pub fn remove_bulk_credit_batch<S: RecordStore + ?Sized>(
    store: &mut S,
    review_date: NaiveDate,
    config: &EngineConfig,
) -> EngineResult<BatchSummary> {
    let filter = EntryFilter::default()
        .with_origin(EntryOrigin::BulkCredit)
        .reviewed_on(review_date);
    let entries = store.find_entries(&filter)?;
    let throttle = config.throttle();

    let mut by_member: BTreeMap<MemberId, Vec<LedgerEntry>> = BTreeMap::new();
    for entry in entries {
        by_member.entry(entry.member_id.clone()).or_default().push(entry);
    }

    tracing::info!(
        date = %review_date,
        members = by_member.len(),
        "removing bulk credit batch"
    );

    let mut summary = BatchSummary::new();
    for (member_id, batch) in &by_member {
        let entity = format!("member {}", member_id);

        let member = match store.get_member(member_id) {
            Ok(Some(member)) => member,
            Ok(None) => {
                summary.record_failure(entity, "member not found");
                continue;
            }
            Err(e) => {
                summary.record_failure(entity, e);
                continue;
            }
        };

        let mut removed = HourTotals::default();
        let mut errors = Vec::new();
        for entry in batch {
            match store.delete_entry(&entry.id) {
                Ok(()) if entry.is_live() => match entry.category {
                    HourCategory::Volunteering => removed.volunteering += entry.hours,
                    HourCategory::Social => removed.social += entry.hours,
                },
                Ok(()) => {}
                Err(e) => errors.push(format!("entry {}: {}", entry.id, e)),
            }
        }

        let before = member.totals();
        let after = HourTotals::from_parts(
            (before.volunteering - removed.volunteering).max(0.0),
            (before.social - removed.social).max(0.0),
        );

        if let Err(e) = store.update_member_hours(member_id, &after, Utc::now()) {
            errors.push(e.to_string());
        } else {
            let event = Event::new(
                "bulk_credit_removed",
                "member",
                member_id.as_str(),
                serde_json::json!({
                    "review_date": review_date,
                    "before": before,
                    "after": after,
                    "entries": batch.iter().map(|e| &e.id).collect::<Vec<_>>(),
                }),
                &config.actor,
            );
            if let Err(e) = store.record_event(&event) {
                tracing::warn!(member = %member_id, error = %e, "failed to record removal event");
            }
        }

        if errors.is_empty() {
            tracing::debug!(member = %member_id, "{} -> {}", before, after);
            summary.record_success();
        } else {
            summary.record_failure(entity, errors.join("; "));
        }
        throttle.pause();
    }

    tracing::info!("{}", summary);
    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================
