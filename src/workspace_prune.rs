// src/workspace_prune.rs
// Workspace store pruning: inside each marked workspace, remove only the
// product's own entries and records.

use std::fs;
use tracing::{debug, info};

use crate::error::{ResetError, Result};
use crate::locker;
use crate::records::delete_keys;
use crate::strategy::{finding_of, ApplyEnv, MutationStrategy};
use crate::types::{FormatHint, MatchedEntry, MutationResult, PlannedStep};
use crate::utils::{is_plain_name, remove_path};

pub struct WorkspacePruner;

impl MutationStrategy for WorkspacePruner {
    fn apply(&self, step: &PlannedStep, env: &mut ApplyEnv) -> Result<MutationResult> {
        let finding = finding_of(step)?;
        let FormatHint::Workspaces { db_file, records, .. } = &finding.path_spec.format_hint else {
            return Err(ResetError::mutation(&finding.path, "not a workspace store"));
        };

        let mut result = MutationResult::default();
        for entry in &finding.matched_entries {
            let MatchedEntry::Workspace {
                name,
                marker_entries,
                record_keys,
            } = entry
            else {
                continue;
            };
            if !is_plain_name(name) {
                return Err(ResetError::mutation(&finding.path, format!("bad workspace name '{name}'")));
            }
            let dir = finding.path.join(name);

            for marker in marker_entries {
                if !is_plain_name(marker) {
                    return Err(ResetError::mutation(&dir, format!("bad marker entry '{marker}'")));
                }
                let target = dir.join(marker);
                if !target.exists() {
                    result.errors.push(format!("{name}/{marker} was already gone"));
                    continue;
                }
                if target.is_file() {
                    locker::unlock(&target).map_err(|e| ResetError::mutation(&target, e.to_string()))?;
                }
                remove_path(&target).map_err(|e| ResetError::mutation(&target, e.to_string()))?;
                debug!("Removed {}", target.display());
                result.changed_entries.push(format!("{name}: removed {marker}"));
            }

            if !record_keys.is_empty() {
                let db_path = dir.join(db_file);
                if fs::metadata(&db_path).is_err() {
                    result.errors.push(format!("{name}/{db_file} was already gone"));
                    continue;
                }
                let deleted = delete_keys(&db_path, records, record_keys, env.busy_timeout)?;
                for key in deleted {
                    result.changed_entries.push(format!("{name}: deleted record {key}"));
                }
            }
        }
        info!(
            "Pruned {} entr(ies) across workspaces in {}",
            result.changed_entries.len(),
            finding.path.display()
        );
        Ok(result)
    }
}
