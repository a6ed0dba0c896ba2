// src/planner.rs
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::error::{ResetError, Result};
use crate::report::ScanReport;
use crate::types::{CleanOptions, MutationPlan, PlannedStep, Strategy};

/// Turns actionable findings into an ordered list of steps: per product,
/// fingerprint resets first, then database and workspace pruning, then the
/// advisory when requested.
pub fn plan(scan: &ScanReport, options: CleanOptions) -> Result<MutationPlan> {
    if options.lock && !options.backup {
        return Err(ResetError::InvalidOptions(
            "locking without a backup is refused; drop --lock or keep backups on".to_string(),
        ));
    }

    let wanted = |product_id: &str| match &options.products {
        Some(ids) => ids.iter().any(|id| id == product_id),
        None => true,
    };

    let mut steps: Vec<PlannedStep> = scan
        .actionable()
        .filter(|f| wanted(&f.product_id))
        .filter_map(|f| {
            let strategy = Strategy::for_kind(f.path_spec.kind);
            if !options.layers.allows(strategy) {
                debug!("Layer {:?} disabled; skipping {}", strategy, f.path.display());
                return None;
            }
            Some(PlannedStep {
                product_id: f.product_id.clone(),
                strategy,
                finding: Some(f.clone()),
            })
        })
        .collect();

    if options.layers.advisory {
        let products: BTreeSet<String> = match &options.products {
            Some(ids) => ids.iter().cloned().collect(),
            None => scan.findings.iter().map(|f| f.product_id.clone()).collect(),
        };
        for product_id in products {
            steps.push(PlannedStep {
                product_id,
                strategy: Strategy::NetworkAdvisory,
                finding: None,
            });
        }
    }

    // Stable: keeps the scan's path order within a (product, strategy) group.
    steps.sort_by(|a, b| (&a.product_id, a.strategy).cmp(&(&b.product_id, b.strategy)));
    info!("Planned {} step(s)", steps.len());
    Ok(MutationPlan { steps, options })
}
