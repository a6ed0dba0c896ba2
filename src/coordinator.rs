// src/coordinator.rs
// Drives one run: Planned -> BackedUp -> Mutating -> Completed, falling back
// to RolledBack / RollbackIncomplete / Failed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::backup::{self, RunLock};
use crate::context::Context;
use crate::error::{ResetError, Result};
use crate::ledger;
use crate::locker;
use crate::report::{ReportedError, RunReport, RunState, StepEvent, StepOutcome, StepStatus};
use crate::strategy::{strategy_for, ApplyEnv};
use crate::types::{BackupSet, MatchedEntry, MutationPlan, MutationResult, PlannedStep, ScanFinding, Strategy};

/// What happened to each step, kept only for the duration of a run.
#[derive(Debug, Default)]
struct TransactionLog {
    outcomes: Vec<StepOutcome>,
    issued: Vec<(PathBuf, Vec<(String, String)>)>,
}

impl TransactionLog {
    fn record(&mut self, step: &PlannedStep, outcome: std::result::Result<MutationResult, &ResetError>) {
        let path = step.finding.as_ref().map(|f| f.path.clone());
        let (status, result, error) = match outcome {
            Ok(result) => {
                if let (Some(path), false) = (&path, result.issued.is_empty()) {
                    self.issued.push((path.clone(), result.issued.clone()));
                }
                (StepStatus::Applied, Some(result), None)
            }
            Err(e) => (StepStatus::Failed, None, Some(ReportedError::from(e))),
        };
        self.outcomes.push(StepOutcome {
            product_id: step.product_id.clone(),
            strategy: step.strategy,
            path,
            status,
            result,
            error,
        });
    }

    fn skip(&mut self, step: &PlannedStep) {
        self.outcomes.push(StepOutcome {
            product_id: step.product_id.clone(),
            strategy: step.strategy,
            path: step.finding.as_ref().map(|f| f.path.clone()),
            status: StepStatus::Skipped,
            result: None,
            error: None,
        });
    }
}

fn fail(report: &mut RunReport, state: RunState, err: &ResetError) {
    error!("Run failed ({}): {}", err.kind(), err);
    report.state = state;
    report.error = Some(ReportedError::from(err));
}

fn check_processes(ctx: &Context, products: &BTreeSet<&str>) -> Result<()> {
    products.iter().try_for_each(|id| ctx.ensure_stopped(id))
}

// Without sets the changes stay.
fn roll_back(ctx: &Context, report: &mut RunReport, sets: &[BackupSet], err: &ResetError) {
    if sets.is_empty() {
        fail(report, RunState::RollbackIncomplete, err);
        return;
    }
    warn!("Rolling back {} backup set(s)", sets.len());
    let rollback = backup::restore_sets(ctx, sets);
    let state = if rollback.is_success() {
        RunState::RolledBack
    } else {
        RunState::RollbackIncomplete
    };
    fail(report, state, err);
    report.rollback = Some(rollback);
}

fn record_issued(ctx: &Context, issued: &[(PathBuf, Vec<(String, String)>)]) -> Result<()> {
    let mut conn = ctx.state_db.lock();
    let tx = conn.transaction()?;
    for (path, values) in issued {
        ledger::record_issued(&tx, path, values)?;
    }
    tx.commit()?;
    debug!("Recorded issued identifiers for {} artifact(s)", issued.len());
    Ok(())
}

// New identifiers must differ from every old value in the plan.
fn old_values(plan: &MutationPlan) -> impl Iterator<Item = String> + '_ {
    plan.mutating_steps()
        .filter_map(|s| s.finding.as_ref())
        .flat_map(|f| f.matched_entries.iter())
        .filter_map(|e| match e {
            MatchedEntry::IdentityField { old_value, .. } => Some(old_value.clone()),
            _ => None,
        })
}

// --- Main run ---

pub fn run(ctx: &Context, plan: &MutationPlan, on_step: &mut dyn FnMut(&StepEvent)) -> Result<RunReport> {
    let options = &plan.options;
    if options.lock && !options.backup {
        return Err(ResetError::InvalidOptions("locking without a backup is refused".to_string()));
    }
    let mut report = RunReport::new(options.dry_run);
    let mut log = TransactionLog::default();

    if options.dry_run {
        info!("Dry run: {} step(s) would be applied", plan.steps.len());
        for step in &plan.steps {
            log.skip(step);
            if step.strategy == Strategy::NetworkAdvisory {
                report.advisories.push(crate::advisory::Advisory::for_product(&step.product_id));
            }
        }
        report.steps = log.outcomes;
        return Ok(report);
    }

    let _lock = RunLock::acquire(&ctx.backup_root)?;
    let mut env = ApplyEnv {
        busy_timeout: ctx.busy_timeout(),
        avoid: old_values(plan).collect(),
        advisories: Vec::new(),
    };

    let products: BTreeSet<&str> = plan.mutating_steps().map(|s| s.product_id.as_str()).collect();
    if let Err(e) = check_processes(ctx, &products) {
        fail(&mut report, RunState::Failed, &e);
        return Ok(report);
    }

    // --- Backup phase ---
    let mut sets: Vec<BackupSet> = Vec::new();
    if options.backup && !plan.is_empty() {
        let mut by_product: BTreeMap<&str, Vec<&ScanFinding>> = BTreeMap::new();
        for step in plan.mutating_steps() {
            if let Some(finding) = &step.finding {
                by_product.entry(step.product_id.as_str()).or_default().push(finding);
            }
        }
        for (product_id, findings) in by_product {
            match backup::snapshot(ctx, product_id, &findings) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    let ids: Vec<String> = sets.iter().map(|s| s.id.clone()).collect();
                    backup::discard(ctx, &ids);
                    fail(&mut report, RunState::Failed, &e);
                    return Ok(report);
                }
            }
        }
        report.backup_sets = sets.iter().map(|s| s.id.clone()).collect();
        report.state = RunState::BackedUp;
        info!("Backed up {} set(s)", sets.len());
    } else if !options.backup {
        warn!("Backups disabled: a failure cannot be rolled back");
    }

    // --- Mutation phase ---
    report.state = RunState::Mutating;
    let total = plan.steps.len();
    let mut failure: Option<ResetError> = None;
    for (index, step) in plan.steps.iter().enumerate() {
        if failure.is_some() {
            log.skip(step);
            continue;
        }
        let outcome = if ctx.cancel.is_cancelled() {
            Err(ResetError::Cancelled)
        } else if step.finding.is_some() {
            ctx.ensure_stopped(&step.product_id)
                .and_then(|_| strategy_for(step.strategy).apply(step, &mut env))
        } else {
            strategy_for(step.strategy).apply(step, &mut env)
        };

        let ok = outcome.is_ok();
        match outcome {
            Ok(result) => {
                debug!("Step {}/{} ({:?}) applied", index + 1, total, step.strategy);
                log.record(step, Ok(result));
            }
            Err(e) => {
                log.record(step, Err(&e));
                failure = Some(e);
            }
        }
        on_step(&StepEvent {
            index,
            total,
            product_id: step.product_id.clone(),
            strategy: step.strategy,
            path: step.finding.as_ref().map(|f| f.path.clone()),
            ok,
        });
    }
    report.advisories = env.advisories;

    report.steps = log.outcomes;
    if let Some(err) = failure {
        roll_back(ctx, &mut report, &sets, &err);
        return Ok(report);
    }

    // A run whose issued values cannot be recorded is rolled back.
    if !log.issued.is_empty() {
        if let Err(err) = record_issued(ctx, &log.issued) {
            roll_back(ctx, &mut report, &sets, &err);
            return Ok(report);
        }
    }

    // --- Completed ---
    report.state = RunState::Completed;

    if options.lock {
        let paths: Vec<PathBuf> = plan
            .mutating_steps()
            .filter(|s| s.strategy == Strategy::FingerprintReset)
            .filter_map(|s| s.finding.as_ref().map(|f| f.path.clone()))
            .collect();
        report.lock = Some(locker::lock(&paths));
    }

    if !sets.is_empty() {
        match backup::prune(ctx, ctx.settings.max_backups, &report.backup_sets) {
            Ok(pruned) => report.pruned_backups = pruned,
            Err(e) => {
                warn!("Backup retention skipped: {}", e);
                report.warnings.push(format!("old backup sets were not pruned: {e}"));
            }
        }
    }
    info!("Run completed: {} step(s)", report.steps.len());
    Ok(report)
}
