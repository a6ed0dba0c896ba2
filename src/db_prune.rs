// src/db_prune.rs
// Database record pruning: delete tracked rows, never tables or files.

use tracing::info;

use crate::error::{ResetError, Result};
use crate::records::{delete_cells, delete_keys, has_sqlite_header, Cell};
use crate::strategy::{finding_of, ApplyEnv, MutationStrategy};
use crate::types::{FormatHint, MatchedEntry, MutationResult, PlannedStep};

pub struct DatabasePruner;

impl MutationStrategy for DatabasePruner {
    fn apply(&self, step: &PlannedStep, env: &mut ApplyEnv) -> Result<MutationResult> {
        let finding = finding_of(step)?;
        if finding.matched_entries.is_empty() {
            return Ok(MutationResult::default());
        }
        if !has_sqlite_header(&finding.path).unwrap_or(false) {
            return Err(ResetError::mutation(&finding.path, "no longer a SQLite database"));
        }

        let (matched, deleted) = match &finding.path_spec.format_hint {
            FormatHint::Records(records) => {
                let keys: Vec<String> = finding
                    .matched_entries
                    .iter()
                    .filter_map(|entry| match entry {
                        MatchedEntry::Record { key } => Some(key.clone()),
                        _ => None,
                    })
                    .collect();
                let deleted = delete_keys(&finding.path, records, &keys, env.busy_timeout)?;
                let described = deleted.iter().map(|k| format!("deleted record {k}")).collect::<Vec<_>>();
                (keys.len(), described)
            }
            FormatHint::TextColumns { .. } => {
                let cells: Vec<Cell> = finding
                    .matched_entries
                    .iter()
                    .filter_map(|entry| match entry {
                        MatchedEntry::Cell { table, column, value } => {
                            Some((table.clone(), column.clone(), value.clone()))
                        }
                        _ => None,
                    })
                    .collect();
                let deleted = delete_cells(&finding.path, &cells, env.busy_timeout)?;
                let described = deleted
                    .iter()
                    .map(|(table, column, value)| format!("deleted {table} row where {column} = {value:?}"))
                    .collect::<Vec<_>>();
                (cells.len(), described)
            }
            _ => return Err(ResetError::mutation(&finding.path, "not a record database")),
        };

        let mut result = MutationResult::default();
        if deleted.len() < matched {
            result
                .errors
                .push(format!("{} record(s) were already gone", matched - deleted.len()));
        }
        info!("Pruned {} record(s) from {}", deleted.len(), finding.path.display());
        result.changed_entries = deleted;
        Ok(result)
    }
}
