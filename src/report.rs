// src/report.rs
// Structured results handed back across the presentation boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::advisory::Advisory;
use crate::error::ResetError;
use crate::locker::LockResult;
use crate::types::{MutationResult, Os, ScanFinding, ScanWarning, Strategy};

// --- Scan ---

#[derive(Debug, Clone, Serialize)]
pub struct SkippedProduct {
    pub product_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub os: Os,
    pub scanned_at: DateTime<Utc>,
    /// Sorted by product id, then path.
    pub findings: Vec<ScanFinding>,
    pub skipped: Vec<SkippedProduct>,
}

impl ScanReport {
    pub fn actionable(&self) -> impl Iterator<Item = &ScanFinding> {
        self.findings.iter().filter(|f| f.is_actionable())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ScanWarning> {
        self.findings.iter().flat_map(|f| f.warnings.iter())
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scan on {} at {}", self.os, self.scanned_at.format("%Y-%m-%d %H:%M:%S UTC"));
        for finding in &self.findings {
            let status = if !finding.exists {
                "absent".to_string()
            } else {
                format!("{} tracked", finding.matched_entries.len())
            };
            let _ = writeln!(out, "  [{}] {} ({})", finding.product_id, finding.path.display(), status);
            for warning in &finding.warnings {
                let _ = writeln!(out, "      warning: {}", describe_warning(warning));
            }
        }
        for skipped in &self.skipped {
            let _ = writeln!(out, "  [{}] skipped: {}", skipped.product_id, skipped.reason);
        }
        out
    }
}

fn describe_warning(warning: &ScanWarning) -> String {
    match warning {
        ScanWarning::Parse { message, .. } => format!("could not parse: {message}"),
        ScanWarning::Busy { .. } => "database busy, records not inspected".to_string(),
        ScanWarning::Io { message, .. } => format!("read failed: {message}"),
    }
}

// --- Run ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planned,
    BackedUp,
    Mutating,
    Completed,
    RolledBack,
    RollbackIncomplete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportedError {
    pub kind: String,
    pub message: String,
}

impl From<&ResetError> for ReportedError {
    fn from(err: &ResetError) -> Self {
        ReportedError {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    Failed,
    /// Not attempted (dry run, or an earlier step failed).
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub product_id: String,
    pub strategy: Strategy,
    pub path: Option<PathBuf>,
    pub status: StepStatus,
    pub result: Option<MutationResult>,
    pub error: Option<ReportedError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub dry_run: bool,
    pub steps: Vec<StepOutcome>,
    /// Backup sets written by this run (deleted again if the backup phase failed).
    pub backup_sets: Vec<String>,
    pub error: Option<ReportedError>,
    pub rollback: Option<RestoreReport>,
    pub lock: Option<LockResult>,
    pub advisories: Vec<Advisory>,
    pub pruned_backups: Vec<String>,
    /// Problems after completion that did not undo the run.
    pub warnings: Vec<String>,
}

impl RunReport {
    pub(crate) fn new(dry_run: bool) -> RunReport {
        RunReport {
            state: RunState::Planned,
            dry_run,
            steps: Vec::new(),
            backup_sets: Vec::new(),
            error: None,
            rollback: None,
            lock: None,
            advisories: Vec::new(),
            pruned_backups: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self.state {
            RunState::Completed => ExitStatus::Success,
            RunState::Planned if self.dry_run => ExitStatus::ScanOnly,
            RunState::RolledBack => ExitStatus::PartialFailureRolledBack,
            RunState::RollbackIncomplete => ExitStatus::FatalRestoreFailure,
            _ => ExitStatus::Error,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let header = if self.dry_run { "Dry run" } else { "Run" };
        let _ = writeln!(out, "{} finished: {:?}", header, self.state);
        for step in &self.steps {
            let path = step
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "  [{}] {:?} {} -> {:?}", step.product_id, step.strategy, path, step.status);
            if let Some(result) = &step.result {
                for change in &result.changed_entries {
                    let _ = writeln!(out, "      {change}");
                }
                for err in &result.errors {
                    let _ = writeln!(out, "      note: {err}");
                }
            }
            if let Some(err) = &step.error {
                let _ = writeln!(out, "      {}: {}", err.kind, err.message);
            }
        }
        if !self.backup_sets.is_empty() {
            let _ = writeln!(out, "Backups: {}", self.backup_sets.join(", "));
        }
        if let Some(err) = &self.error {
            let _ = writeln!(out, "Error ({}): {}", err.kind, err.message);
        }
        if let Some(rollback) = &self.rollback {
            out.push_str(&rollback.render_text());
        }
        if let Some(lock) = &self.lock {
            let _ = writeln!(out, "Locked {} file(s), {} failed", lock.locked.len(), lock.failed.len());
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "Warning: {warning}");
        }
        for advisory in &self.advisories {
            out.push_str(&advisory.render_text());
        }
        out
    }
}

/// Emitted after each mutating step.
#[derive(Debug, Clone, Serialize)]
pub struct StepEvent {
    pub index: usize,
    pub total: usize,
    pub product_id: String,
    pub strategy: Strategy,
    pub path: Option<PathBuf>,
    pub ok: bool,
}

// --- Restore ---

#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
    pub path: PathBuf,
    pub error: ReportedError,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub set_ids: Vec<String>,
    pub restored: Vec<PathBuf>,
    pub failures: Vec<EntryFailure>,
    /// Pre-restore snapshot taken before a manual restore.
    pub safety_backup: Option<String>,
}

impl RestoreReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.is_success() {
            ExitStatus::Success
        } else {
            ExitStatus::FatalRestoreFailure
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Restore of {}: {} restored, {} failed",
            self.set_ids.join(", "),
            self.restored.len(),
            self.failures.len()
        );
        if let Some(id) = &self.safety_backup {
            let _ = writeln!(out, "  safety backup: {id}");
        }
        for failure in &self.failures {
            let _ = writeln!(out, "  {} ({}): {}", failure.path.display(), failure.error.kind, failure.error.message);
        }
        out
    }
}

// --- Exit codes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitStatus {
    Success,
    Error,
    ScanOnly,
    PartialFailureRolledBack,
    FatalRestoreFailure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Error => 1,
            ExitStatus::ScanOnly => 2,
            ExitStatus::PartialFailureRolledBack => 3,
            ExitStatus::FatalRestoreFailure => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_states_map_to_exit_codes() {
        let mut report = RunReport::new(true);
        assert_eq!(report.exit_status().code(), 2);
        report.dry_run = false;
        for (state, code) in [
            (RunState::Completed, 0),
            (RunState::Failed, 1),
            (RunState::RolledBack, 3),
            (RunState::RollbackIncomplete, 4),
        ] {
            report.state = state;
            assert_eq!(report.exit_status().code(), code);
        }
    }
}
