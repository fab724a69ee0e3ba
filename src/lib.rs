// Hours Ledger - Core Library
// Aggregate reconciliation, synthetic entry cleanup and attendance merging.
// The binary in main.rs is a thin batch driver over these modules.

pub mod adjustments;
pub mod attendance;
pub mod batch;
pub mod config;
pub mod error;
pub mod legacy;
pub mod members;
pub mod model;
pub mod reconciliation;
pub mod store;

// Re-export commonly used types
pub use adjustments::{
    dedupe, dedupe_all, find_redundant, plan_dedupe, remove_bulk_credit_batch,
    DedupeOutcome, RedundancyReason, RedundantEntry,
};
pub use attendance::{
    consolidate_date, import_attendance, load_form_responses, merge, seed_attendance,
    ConsolidationOutcome, FormResponse, FormSheet, ImportError, ImportOutcome,
    MergeOutcome, SeedError, SeedOutcome,
};
pub use batch::{BatchSummary, FailureDetail, Throttle};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use legacy::{load_legacy_csv, parse_hours, LegacyIndex, LegacyRow};
pub use members::{find_members_by_name, merge_members, MemberMergeOutcome};
pub use model::{
    AttendanceRecord, EntryOrigin, EntryStatus, Event, HourCategory, HourTotals,
    LedgerEntry, Meeting, Member, MemberId, SessionType,
};
pub use reconciliation::{
    apply_correction, reconcile_all, reconcile_member, verify_all,
    Correction, Discrepancy, OverlapPolicy, ReconcileOutcome, ReconcileReport,
    ReconciliationEngine, RunOptions, VerificationReport,
};
pub use store::{
    setup_database, EntryFilter, MemoryStore, Page, RecordStore, SqliteStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
