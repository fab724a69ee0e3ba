// 🗓️ Attendance - merge duplicate meetings, seed roster-wide attendance and
// import sign-in form responses
//
// At most one attendance record per (meeting, member). Every operation is
// safe to re-run: a second pass finds nothing left to do.

pub mod import;
pub mod merge;
pub mod seed;

pub use import::{
    import_attendance, load_form_responses, FormResponse, FormSheet, ImportError, ImportOutcome,
};
pub use merge::{consolidate_date, merge, ConsolidationOutcome, MergeOutcome};
pub use seed::{seed_attendance, SeedError, SeedOutcome};
