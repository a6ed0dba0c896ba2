// src/strategy.rs
use std::collections::HashSet;
use std::time::Duration;

use crate::advisory::{Advisory, AdvisoryStrategy};
use crate::db_prune::DatabasePruner;
use crate::error::{ResetError, Result};
use crate::fingerprint::FingerprintResetter;
use crate::types::{MutationResult, PlannedStep, ScanFinding, Strategy};
use crate::workspace_prune::WorkspacePruner;

/// Per-run state the strategies share.
#[derive(Debug, Default)]
pub struct ApplyEnv {
    pub busy_timeout: Duration,
    /// Every old value seen in this run plus every value issued so far; new
    /// identifiers must not collide with any of them.
    pub avoid: HashSet<String>,
    pub advisories: Vec<Advisory>,
}

// --- Strategy Trait (one implementation per artifact kind) ---

pub trait MutationStrategy {
    /// Changes exactly the entries matched at scan time.
    fn apply(&self, step: &PlannedStep, env: &mut ApplyEnv) -> Result<MutationResult>;
}

pub fn strategy_for(strategy: Strategy) -> Box<dyn MutationStrategy> {
    match strategy {
        Strategy::FingerprintReset => Box::new(FingerprintResetter),
        Strategy::DatabasePrune => Box::new(DatabasePruner),
        Strategy::WorkspacePrune => Box::new(WorkspacePruner),
        Strategy::NetworkAdvisory => Box::new(AdvisoryStrategy),
    }
}

/// The finding a mutating step works on.
pub(crate) fn finding_of(step: &PlannedStep) -> Result<&ScanFinding> {
    step.finding.as_ref().ok_or_else(|| {
        ResetError::InvalidOptions(format!("{:?} step for '{}' has no scan finding", step.strategy, step.product_id))
    })
}
