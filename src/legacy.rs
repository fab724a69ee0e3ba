// 📜 Legacy Import - historical hour totals from the old spreadsheet
//
// Numeric fields are lenient: empty or unparseable values count as zero,
// never as an error.

use crate::model::MemberId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// One parsed row of the legacy sheet
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LegacyRow {
    #[serde(rename = "Student ID#", alias = "member_id")]
    pub member_id: String,

    #[serde(rename = "Member Name", alias = "member_name", default)]
    pub member_name: String,

    #[serde(
        rename = "Total Hours Volunteering",
        alias = "total_hours_volunteering",
        default
    )]
    pub total_hours_volunteering: String,

    #[serde(rename = "Total Hours Social", alias = "total_hours_social", default)]
    pub total_hours_social: String,
}

/// Parse an hour figure the way the spreadsheet was read: the leading
/// numeric prefix counts ("12.5 hrs" is 12.5); anything else is zero.
/// Negative and non-finite values are also zero.
pub fn parse_hours(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let mut end = 0;
    let mut seen_dot = false;

    for (i, c) in trimmed.char_indices() {
        match c {
            '0'..='9' => end = i + 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            '+' | '-' if i == 0 => end = i + 1,
            _ => break,
        }
    }

    match trimmed[..end].parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => 0.0,
    }
}

impl LegacyRow {
    pub fn new(member_id: &str, member_name: &str, volunteering: &str, social: &str) -> Self {
        LegacyRow {
            member_id: member_id.to_string(),
            member_name: member_name.to_string(),
            total_hours_volunteering: volunteering.to_string(),
            total_hours_social: social.to_string(),
        }
    }

    pub fn member(&self) -> MemberId {
        MemberId::new(&self.member_id)
    }

    pub fn volunteering(&self) -> f64 {
        parse_hours(&self.total_hours_volunteering)
    }

    pub fn social(&self) -> f64 {
        parse_hours(&self.total_hours_social)
    }

    pub fn has_hours(&self) -> bool {
        self.volunteering() > 0.0 || self.social() > 0.0
    }

    /// Content hash of the normalized row; identifies which sheet row
    /// produced a set of synthetic entries
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.member(),
            self.volunteering(),
            self.social()
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Legacy rows keyed by normalized member id
#[derive(Debug, Clone, Default)]
pub struct LegacyIndex {
    rows: HashMap<MemberId, LegacyRow>,
    skipped: usize,
}

impl LegacyIndex {
    /// Rows with no member id or no hours are skipped. When a member appears
    /// twice the later row wins.
    pub fn from_rows(rows: impl IntoIterator<Item = LegacyRow>) -> Self {
        let mut index = LegacyIndex::default();

        for row in rows {
            let member = row.member();
            if member.is_empty() || !row.has_hours() {
                index.skipped += 1;
                continue;
            }
            if let Some(previous) = index.rows.insert(member.clone(), row) {
                tracing::warn!(
                    member = %member,
                    replaced = %previous.member_name,
                    "duplicate legacy row, keeping the later one"
                );
                index.skipped += 1;
            }
        }

        index
    }

    pub fn get(&self, member: &MemberId) -> Option<&LegacyRow> {
        self.rows.get(member)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows dropped while building the index
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Member ids in sorted order
    pub fn members(&self) -> Vec<&MemberId> {
        let mut ids: Vec<&MemberId> = self.rows.keys().collect();
        ids.sort();
        ids
    }
}

/// Read the legacy sheet. Short rows are padded with empty cells, so missing
/// trailing hours count as zero; a row that still cannot be read is logged and
/// left out.
pub fn load_legacy_csv(csv_path: &Path) -> Result<Vec<LegacyRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open legacy CSV {}", csv_path.display()))?;
    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read legacy headers {}", csv_path.display()))?
        .clone();

    let mut rows = Vec::new();
    for (n, result) in rdr.records().enumerate() {
        let parsed = result.and_then(|mut record| {
            while record.len() < headers.len() {
                record.push_field("");
            }
            record.deserialize::<LegacyRow>(Some(&headers))
        });
        match parsed {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(line = n + 2, error = %e, "skipping unreadable legacy row"),
        }
    }

    Ok(rows)
}
