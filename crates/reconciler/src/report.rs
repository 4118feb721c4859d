//! Reconciliation pass report

use crate::registry::FieldChange;
use crate::transfer::MergeStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skymerge_common::errors::{ErrorCode, Result};
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

/// Outcome of one merge group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    Merged,
    /// Dry run: planned but not applied
    Planned,
    Failed { code: ErrorCode, message: String },
    Skipped { reason: String },
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Merged => "merged",
            GroupStatus::Planned => "planned",
            GroupStatus::Failed { .. } => "failed",
            GroupStatus::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    pub primary: String,
    pub primary_id: Uuid,
    pub absorbed: Vec<String>,
    #[serde(flatten)]
    pub status: GroupStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MergeStats>,
    /// Absorbed shells deleted after commit
    #[serde(default)]
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTarget {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub groups: usize,
    pub merged: usize,
    pub planned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub absorbed: usize,
    pub deleted: usize,
}

/// Everything one pass found and did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub selector: String,
    pub radius_arcsec: f64,
    pub dry_run: bool,
    pub delete_duplicates: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub groups: Vec<GroupEntry>,
    pub singletons: usize,
    pub excluded: Vec<String>,
    /// Targets left out of the scan, e.g. for a malformed position
    pub skipped_targets: Vec<SkippedTarget>,
    pub cancelled: bool,
    /// Error that stopped the pass early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ReconciliationReport {
    pub fn new(selector: &str, radius_arcsec: f64, dry_run: bool, delete_duplicates: bool) -> Self {
        Self {
            selector: selector.to_string(),
            radius_arcsec,
            dry_run,
            delete_duplicates,
            started_at: Utc::now(),
            finished_at: None,
            groups: Vec::new(),
            singletons: 0,
            excluded: Vec::new(),
            skipped_targets: Vec::new(),
            cancelled: false,
            aborted: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn totals(&self) -> ReportTotals {
        let mut totals = ReportTotals {
            groups: self.groups.len(),
            ..Default::default()
        };

        for group in &self.groups {
            match group.status {
                GroupStatus::Merged => {
                    totals.merged += 1;
                    totals.absorbed += group.absorbed.len();
                }
                GroupStatus::Planned => {
                    totals.planned += 1;
                    totals.absorbed += group.absorbed.len();
                }
                GroupStatus::Failed { .. } => totals.failed += 1,
                GroupStatus::Skipped { .. } => totals.skipped += 1,
            }
            totals.deleted += group.deleted;
        }

        totals
    }

    /// Plain-text summary with one `primary <- absorbed` line per group
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };

        let _ = writeln!(
            out,
            "Reconciliation of '{}' at {}\"{}",
            self.selector, self.radius_arcsec, mode
        );

        for group in &self.groups {
            let _ = write!(out, "  {} <- {}", group.primary, group.absorbed.join(", "));
            match &group.status {
                GroupStatus::Merged => {
                    if group.deleted > 0 {
                        let _ = write!(out, "  [merged, {} deleted]", group.deleted);
                    } else {
                        let _ = write!(out, "  [merged]");
                    }
                }
                GroupStatus::Planned if self.delete_duplicates => {
                    let _ = write!(out, "  [planned, {} would be deleted]", group.absorbed.len());
                }
                GroupStatus::Planned => {
                    let _ = write!(out, "  [planned]");
                }
                GroupStatus::Failed { code, message } => {
                    let _ = write!(out, "  [failed {:?}: {}]", code, message);
                }
                GroupStatus::Skipped { reason } => {
                    let _ = write!(out, "  [skipped: {}]", reason);
                }
            }
            out.push('\n');
        }

        for skipped in &self.skipped_targets {
            let _ = writeln!(out, "  skipped {}: {}", skipped.name, skipped.reason);
        }
        if !self.excluded.is_empty() {
            let _ = writeln!(out, "  excluded: {}", self.excluded.join(", "));
        }

        let totals = self.totals();
        let _ = writeln!(
            out,
            "{} groups ({} merged, {} planned, {} failed, {} skipped), {} absorbed, {} deleted, {} singletons",
            totals.groups,
            totals.merged,
            totals.planned,
            totals.failed,
            totals.skipped,
            totals.absorbed,
            totals.deleted,
            self.singletons
        );
        if self.cancelled {
            let _ = writeln!(out, "Pass cancelled before all targets were visited");
        }
        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "Pass aborted: {}", reason);
        }

        out
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
