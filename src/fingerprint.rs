// src/fingerprint.rs
// Device-fingerprint reset: swap identifier values in place, leaving every
// other byte of the file as it was.

use regex::{Captures, Regex};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ResetError, Result};
use crate::id_generator::{format_for, generate_distinct};
use crate::locker;
use crate::scanner::FLAT_FIELD;
use crate::strategy::{finding_of, ApplyEnv, MutationStrategy};
use crate::types::{FormatHint, IdFormat, MatchedEntry, MutationResult, PlannedStep};
use crate::utils::write_atomic;

pub struct FingerprintResetter;

impl MutationStrategy for FingerprintResetter {
    fn apply(&self, step: &PlannedStep, env: &mut ApplyEnv) -> Result<MutationResult> {
        let finding = finding_of(step)?;
        let path = finding.path.as_path();
        let targets: Vec<(&str, &str)> = finding
            .matched_entries
            .iter()
            .filter_map(|entry| match entry {
                MatchedEntry::IdentityField { field, old_value } => Some((field.as_str(), old_value.as_str())),
                _ => None,
            })
            .collect();
        if targets.is_empty() {
            return Ok(MutationResult::default());
        }

        // A file locked by an earlier run has to become writable first.
        locker::unlock(path).map_err(|e| ResetError::mutation(path, format!("cannot unlock: {e}")))?;
        let original = fs::read_to_string(path).map_err(|e| ResetError::mutation(path, e.to_string()))?;

        let mut result = MutationResult::default();
        let updated = match &finding.path_spec.format_hint {
            FormatHint::FlatId { format } => {
                let (field, old) = targets[0];
                let new = fresh_id(path, old, *format, env)?;
                let text = replace_flat(path, &original, old, &new)?;
                result.changed_entries.push(format!("{field}: replaced identifier"));
                result.issued.push((field.to_string(), new));
                text
            }
            FormatHint::JsonKeys { fields } => {
                let mut text = original.clone();
                for (key, old) in &targets {
                    let hint = fields
                        .iter()
                        .find(|f| f.key == *key)
                        .map(|f| f.format)
                        .unwrap_or(IdFormat::Uuid);
                    let new = fresh_id(path, old, hint, env)?;
                    text = replace_json_value(path, &text, key, old, &new)?;
                    result.changed_entries.push(format!("{key}: replaced identifier"));
                    result.issued.push((key.to_string(), new));
                }
                verify_json(path, &text, &result.issued)?;
                text
            }
            other => {
                return Err(ResetError::mutation(
                    path,
                    format!("fingerprint reset cannot handle {other:?}"),
                ))
            }
        };

        write_atomic(path, updated.as_bytes()).map_err(|e| ResetError::mutation(path, e.to_string()))?;
        info!("Reset {} identifier(s) in {}", result.issued.len(), path.display());
        Ok(result)
    }
}

fn fresh_id(path: &Path, old: &str, hint: IdFormat, env: &mut ApplyEnv) -> Result<String> {
    let format = format_for(old, hint);
    let new = generate_distinct(format, &env.avoid)
        .ok_or_else(|| ResetError::mutation(path, "could not generate a distinct identifier"))?;
    env.avoid.insert(new.clone());
    debug!("Generated {:?} identifier for {}", format, path.display());
    Ok(new)
}

fn replace_flat(path: &Path, text: &str, old: &str, new: &str) -> Result<String> {
    if text.trim() != old {
        return Err(ResetError::mutation(path, "content changed since the scan"));
    }
    let start = text.len() - text.trim_start().len();
    let end = start + old.len();
    Ok(format!("{}{}{}", &text[..start], new, &text[end..]))
}

// Rewrites the string literal of `"key": "old"` and nothing else.
fn replace_json_value(path: &Path, text: &str, key: &str, old: &str, new: &str) -> Result<String> {
    let current: serde_json::Value = serde_json::from_str(text)?;
    if current.get(key).and_then(|v| v.as_str()) != Some(old) {
        return Err(ResetError::mutation(path, format!("{key} changed since the scan")));
    }

    let key_literal = serde_json::to_string(key)?;
    let old_literal = serde_json::to_string(old)?;
    let new_literal = serde_json::to_string(new)?;
    let pattern = format!(r"({}\s*:\s*){}", regex::escape(&key_literal), regex::escape(&old_literal));
    let re = Regex::new(&pattern).map_err(|e| ResetError::mutation(path, e.to_string()))?;

    match re.find_iter(text).count() {
        1 => {}
        0 => return Err(ResetError::mutation(path, format!("{key} is not written as a plain string literal"))),
        _ => return Err(ResetError::mutation(path, format!("{key} appears more than once with the same value"))),
    }
    Ok(re
        .replacen(text, 1, |caps: &Captures| format!("{}{}", &caps[1], new_literal))
        .into_owned())
}

fn verify_json(path: &Path, text: &str, issued: &[(String, String)]) -> Result<()> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ResetError::mutation(path, format!("edit broke the JSON: {e}")))?;
    for (key, value) in issued {
        if parsed.get(key).and_then(|v| v.as_str()) != Some(value.as_str()) {
            return Err(ResetError::mutation(path, format!("{key} did not take the new value")));
        }
    }
    Ok(())
}
