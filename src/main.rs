// Hours Ledger - batch driver
// Each subcommand runs one engine operation and prints its summary as JSON.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hours_ledger::{
    consolidate_date, dedupe_all, find_members_by_name, import_attendance, load_form_responses,
    load_legacy_csv, merge, merge_members, reconcile_all, reconcile_member,
    remove_bulk_credit_batch, seed_attendance, verify_all, EngineConfig, LegacyIndex, MemberId,
    ReconcileOutcome, RunOptions, SessionType, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(name = "hours-ledger")]
#[command(version, about = "Reconcile member hour aggregates and merge attendance", long_about = None)]
struct Args {
    /// SQLite database file
    #[arg(long, env = "HOURS_LEDGER_DB", default_value = "hours_ledger.db")]
    db: PathBuf,

    /// TOML engine configuration; defaults apply when omitted
    #[arg(long, env = "HOURS_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the pause between per-entity writes
    #[arg(long)]
    throttle_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute every member's aggregate from the ledger and legacy sheet
    Reconcile {
        /// Legacy sheet (CSV)
        #[arg(long)]
        legacy: PathBuf,
        /// Report corrections without writing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Reconcile only this member
        #[arg(long, conflicts_with = "dry_run")]
        member: Option<String>,
    },
    /// List members whose aggregate disagrees with the ledger (read-only)
    Verify {
        #[arg(long)]
        legacy: PathBuf,
    },
    /// Remove redundant synthetic entries for every member
    Dedupe,
    /// Remove the bulk credit batch reviewed on a date (YYYY-MM-DD, UTC)
    RemoveBulkCredit {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Fold one meeting's attendance into another and delete it
    MergeMeetings {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
    },
    /// Merge every meeting on a date into the busiest one
    ConsolidateMeetings {
        #[arg(long)]
        date: NaiveDate,
    },
    /// Give the whole roster attendance for the meeting on a date
    SeedAttendance {
        #[arg(long)]
        date: NaiveDate,
        /// morning, afternoon or both
        #[arg(long, default_value = "both")]
        session: SessionType,
    },
    /// Record attendance from a sign-in form export (CSV)
    ImportAttendance { csv: PathBuf },
    /// Case-insensitive member name search
    FindMembers { name: String },
    /// Fold a duplicate member account into the kept one
    MergeMembers {
        #[arg(long)]
        keep: String,
        #[arg(long)]
        duplicate: String,
    },
    /// Backfill entry origins on a database written by an older version
    MigrateOrigins,
    /// Row counts per table
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hours_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = args.throttle_ms {
        config.throttle_ms = ms;
    }

    let mut store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    tracing::info!(db = %args.db.display(), version = hours_ledger::VERSION, "store ready");

    match args.command {
        Command::Reconcile {
            legacy,
            member: Some(member),
            ..
        } => {
            let index = load_index(&legacy)?;
            let member_id = MemberId::new(&member);
            let outcome = reconcile_member(&mut store, &member_id, index.get(&member_id), &config)?;
            match outcome {
                ReconcileOutcome::NoOp => {
                    print_json(&serde_json::json!({ "member_id": member_id, "corrected": false }))?
                }
                ReconcileOutcome::Correct(correction) => print_json(&serde_json::json!({
                    "member_id": member_id,
                    "corrected": true,
                    "before": correction.before,
                    "after": correction.after,
                }))?,
            }
        }
        Command::Reconcile { legacy, dry_run, .. } => {
            let index = load_index(&legacy)?;
            let report = reconcile_all(&mut store, &index, &config, RunOptions { dry_run })?;
            print_json(&report)?;
        }
        Command::Verify { legacy } => {
            let index = load_index(&legacy)?;
            let report = verify_all(&store, &index, &config)?;
            print_json(&report)?;
        }
        Command::Dedupe => {
            print_json(&dedupe_all(&mut store, &config)?)?;
        }
        Command::RemoveBulkCredit { date } => {
            print_json(&remove_bulk_credit_batch(&mut store, date, &config)?)?;
        }
        Command::MergeMeetings { source, target } => {
            print_json(&merge(&mut store, &source, &target, &config.actor)?)?;
        }
        Command::ConsolidateMeetings { date } => {
            print_json(&consolidate_date(&mut store, date, &config.actor)?)?;
        }
        Command::SeedAttendance { date, session } => {
            print_json(&seed_attendance(&mut store, date, session, &config)?)?;
        }
        Command::ImportAttendance { csv } => {
            let sheet = load_form_responses(&csv)?;
            let mut outcome = import_attendance(&mut store, &sheet.responses, &config)?;
            outcome.errors.extend(sheet.unreadable);
            print_json(&outcome)?;
        }
        Command::FindMembers { name } => {
            print_json(&find_members_by_name(&store, &name)?)?;
        }
        Command::MergeMembers { keep, duplicate } => {
            let outcome = merge_members(
                &mut store,
                &MemberId::new(&keep),
                &MemberId::new(&duplicate),
                &config,
            )?;
            print_json(&outcome)?;
        }
        Command::MigrateOrigins => {
            let updated = store.migrate_entry_origins()?;
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Command::Stats => {
            print_json(&store.counts()?)?;
        }
    }

    Ok(())
}

fn load_index(path: &Path) -> Result<LegacyIndex> {
    let rows = load_legacy_csv(path)?;
    let total = rows.len();
    let index = LegacyIndex::from_rows(rows);
    tracing::info!(
        rows = total,
        members = index.len(),
        skipped = index.skipped(),
        "loaded legacy sheet"
    );
    Ok(index)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
