// src/scanner.rs
// Read-only discovery of identity artifacts, fanned out over a bounded pool.

use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{is_sqlite_busy, ResetError, Result};
use crate::ledger;
use crate::records::{has_sqlite_header, matching_cells, matching_keys};
use crate::report::{ScanReport, SkippedProduct};
use crate::types::{
    FormatHint, IdentityField, MatchedEntry, RecordTable, ResolvedPath, ScanFinding, ScanWarning,
};
use crate::utils::is_plain_name;

/// Field name used for flat files, whose whole content is the identifier.
pub const FLAT_FIELD: &str = "content";

// --- Main Scan Entry ---

/// Scans the given products (all registered ones when `products` is empty).
/// Problems with individual artifacts become warnings; only an unknown product
/// or cancellation aborts.
pub fn scan(ctx: &Context, products: &[String]) -> Result<ScanReport> {
    let ids: Vec<String> = if products.is_empty() {
        ctx.registry.products().iter().map(|p| p.id.clone()).collect()
    } else {
        products.to_vec()
    };
    info!("[SCANNER] Starting scan of {} product(s) on {}", ids.len(), ctx.os);

    let mut resolved = Vec::new();
    let mut skipped = Vec::new();
    for id in &ids {
        match ctx.registry.resolve(id, ctx.os) {
            Ok(paths) => resolved.extend(paths.into_iter().flat_map(expand_wildcards)),
            Err(e @ ResetError::UnsupportedOs { .. }) => {
                warn!("[SCANNER] Skipping {}: {}", id, e);
                skipped.push(SkippedProduct {
                    product_id: id.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    debug!("[SCANNER] {} candidate paths", resolved.len());

    let issued = ledger::load_issued(&ctx.state_db.lock())?;
    let timeout = ctx.busy_timeout();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.settings.scan_concurrency.max(1))
        .build()
        .map_err(|e| ResetError::InvalidOptions(format!("scan pool: {e}")))?;

    let mut findings: Vec<ScanFinding> = pool.install(|| {
        resolved
            .par_iter()
            .map(|target| {
                if ctx.cancel.is_cancelled() {
                    return None;
                }
                Some(scan_one(target, &issued, timeout))
            })
            .collect::<Option<Vec<_>>>()
    })
    .ok_or(ResetError::Cancelled)?;

    findings.sort_by(|a, b| (&a.product_id, &a.path).cmp(&(&b.product_id, &b.path)));
    info!(
        "[SCANNER] Scan complete: {} artifacts present, {} actionable",
        findings.iter().filter(|f| f.exists).count(),
        findings.iter().filter(|f| f.is_actionable()).count()
    );
    Ok(ScanReport {
        os: ctx.os,
        scanned_at: Utc::now(),
        findings,
        skipped,
    })
}

// `*` segments match directories on disk. Without a match the literal path
// is kept and reports absent.
fn expand_wildcards(target: ResolvedPath) -> Vec<ResolvedPath> {
    if !target.path.components().any(|c| c.as_os_str() == "*") {
        return vec![target];
    }
    let mut prefixes = vec![PathBuf::new()];
    for component in target.path.components() {
        if component.as_os_str() == "*" {
            prefixes = prefixes
                .iter()
                .flat_map(|prefix| subdirectories(prefix).into_iter().map(move |name| prefix.join(name)))
                .collect();
        } else {
            for prefix in &mut prefixes {
                prefix.push(component);
            }
        }
    }
    if prefixes.is_empty() {
        return vec![target];
    }
    prefixes
        .into_iter()
        .map(|path| ResolvedPath {
            product_id: target.product_id.clone(),
            spec: target.spec.clone(),
            path,
        })
        .collect()
}

fn subdirectories(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else { return Vec::new() };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| is_plain_name(name))
        .collect();
    names.sort();
    names
}

fn scan_one(target: &ResolvedPath, issued: &HashSet<String>, timeout: Duration) -> ScanFinding {
    let mut finding = ScanFinding {
        product_id: target.product_id.clone(),
        path_spec: target.spec.clone(),
        path: target.path.clone(),
        exists: target.path.exists(),
        matched_entries: Vec::new(),
        probed: 0,
        warnings: Vec::new(),
    };
    if !finding.exists {
        return finding;
    }
    match &target.spec.format_hint {
        FormatHint::FlatId { .. } => scan_flat(&mut finding, issued),
        FormatHint::JsonKeys { fields } => scan_json(&mut finding, fields, issued),
        FormatHint::Records(records) => scan_db(&mut finding, records, timeout),
        FormatHint::TextColumns { key_patterns } => scan_cells(&mut finding, key_patterns, timeout),
        FormatHint::Workspaces {
            marker_entries,
            db_file,
            records,
        } => scan_workspaces(&mut finding, marker_entries, db_file, records, timeout),
    }
    if !finding.warnings.is_empty() {
        debug!("[SCANNER] {} warning(s) for {}", finding.warnings.len(), finding.path.display());
    }
    finding
}

fn read_text(finding: &mut ScanFinding) -> Option<String> {
    let path = finding.path.clone();
    match fs::read(&path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                finding.warnings.push(ScanWarning::Parse {
                    path,
                    message: "not valid UTF-8".to_string(),
                });
                None
            }
        },
        Err(e) => {
            finding.warnings.push(ScanWarning::Io {
                path,
                message: e.to_string(),
            });
            None
        }
    }
}

// --- Per-kind probes ---

fn scan_flat(finding: &mut ScanFinding, issued: &HashSet<String>) {
    let Some(text) = read_text(finding) else { return };
    finding.probed = 1;
    let value = text.trim();
    if value.is_empty() || value.lines().count() > 1 {
        finding.warnings.push(ScanWarning::Parse {
            path: finding.path.clone(),
            message: "expected a single identifier".to_string(),
        });
        return;
    }
    if issued.contains(&ledger::fingerprint(&finding.path, FLAT_FIELD, value)) {
        debug!("[SCANNER] {} already holds an issued value", finding.path.display());
        return;
    }
    finding.matched_entries.push(MatchedEntry::IdentityField {
        field: FLAT_FIELD.to_string(),
        old_value: value.to_string(),
    });
}

fn scan_json(finding: &mut ScanFinding, fields: &[IdentityField], issued: &HashSet<String>) {
    let Some(text) = read_text(finding) else { return };
    let parsed: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            finding.warnings.push(ScanWarning::Parse {
                path: finding.path.clone(),
                message: e.to_string(),
            });
            return;
        }
    };
    let Some(object) = parsed.as_object() else {
        finding.warnings.push(ScanWarning::Parse {
            path: finding.path.clone(),
            message: "top-level value is not an object".to_string(),
        });
        return;
    };
    for field in fields {
        finding.probed += 1;
        // Only non-empty string values are identifiers we know how to replace.
        let Some(value) = object.get(&field.key).and_then(|v| v.as_str()) else { continue };
        if value.is_empty() || issued.contains(&ledger::fingerprint(&finding.path, &field.key, value)) {
            continue;
        }
        finding.matched_entries.push(MatchedEntry::IdentityField {
            field: field.key.clone(),
            old_value: value.to_string(),
        });
    }
}

fn check_header(path: &Path) -> std::result::Result<(), ScanWarning> {
    match has_sqlite_header(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ScanWarning::Parse {
            path: path.to_path_buf(),
            message: "not a SQLite 3 database".to_string(),
        }),
        Err(e) => Err(ScanWarning::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

fn sqlite_warning(path: &Path, e: rusqlite::Error) -> ScanWarning {
    if is_sqlite_busy(&e) {
        ScanWarning::Busy { path: path.to_path_buf() }
    } else {
        ScanWarning::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

fn probe_records(path: &Path, records: &RecordTable, timeout: Duration) -> std::result::Result<Vec<String>, ScanWarning> {
    check_header(path)?;
    matching_keys(path, records, timeout).map_err(|e| sqlite_warning(path, e))
}

fn scan_db(finding: &mut ScanFinding, records: &RecordTable, timeout: Duration) {
    match probe_records(&finding.path, records, timeout) {
        Ok(keys) => {
            finding.probed = keys.len();
            let sample: Vec<_> = keys.iter().take(5).collect();
            debug!("[SCANNER] {} tracked records in {} (sample: {:?})", keys.len(), finding.path.display(), sample);
            finding
                .matched_entries
                .extend(keys.into_iter().map(|key| MatchedEntry::Record { key }));
        }
        Err(warning) => finding.warnings.push(warning),
    }
}

fn scan_cells(finding: &mut ScanFinding, patterns: &[String], timeout: Duration) {
    let path = finding.path.clone();
    let probed = check_header(&path)
        .and_then(|_| matching_cells(&path, patterns, timeout).map_err(|e| sqlite_warning(&path, e)));
    match probed {
        Ok(cells) => {
            finding.probed = cells.len();
            finding.matched_entries.extend(
                cells
                    .into_iter()
                    .map(|(table, column, value)| MatchedEntry::Cell { table, column, value }),
            );
        }
        Err(warning) => finding.warnings.push(warning),
    }
}

fn scan_workspaces(
    finding: &mut ScanFinding,
    marker_entries: &[String],
    db_file: &str,
    records: &RecordTable,
    timeout: Duration,
) {
    if let Err(e) = fs::read_dir(&finding.path) {
        finding.warnings.push(ScanWarning::Io {
            path: finding.path.clone(),
            message: e.to_string(),
        });
        return;
    }
    let workspaces = subdirectories(&finding.path);
    finding.probed = workspaces.len();

    for name in workspaces {
        let dir = finding.path.join(&name);
        let markers: Vec<String> = marker_entries
            .iter()
            .filter(|marker| dir.join(marker).exists())
            .cloned()
            .collect();

        let db_path = dir.join(db_file);
        let record_keys = if db_path.is_file() && !records.key_patterns.is_empty() {
            match probe_records(&db_path, records, timeout) {
                Ok(keys) => keys,
                Err(warning) => {
                    finding.warnings.push(warning);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if markers.is_empty() && record_keys.is_empty() {
            continue;
        }
        finding.matched_entries.push(MatchedEntry::Workspace {
            name,
            marker_entries: markers,
            record_keys,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtifactKind, IdFormat, PathSpec};

    fn target(path: PathBuf, kind: ArtifactKind, hint: FormatHint) -> ResolvedPath {
        ResolvedPath {
            product_id: "vscode".into(),
            spec: PathSpec {
                kind,
                path_template: "{config}/x".into(),
                format_hint: hint,
            },
            path,
        }
    }

    #[test]
    fn malformed_json_is_a_warning_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{ not json").unwrap();
        let hint = FormatHint::JsonKeys {
            fields: vec![IdentityField {
                key: "telemetry.machineId".into(),
                format: IdFormat::Hex64,
            }],
        };
        let finding = scan_one(&target(path, ArtifactKind::JsonFile, hint), &HashSet::new(), Duration::from_millis(50));
        assert!(finding.exists);
        assert!(finding.matched_entries.is_empty());
        assert!(matches!(finding.warnings[0], ScanWarning::Parse { .. }));
    }

    #[test]
    fn issued_values_are_not_matched_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machineid");
        fs::write(&path, "4c1a9f3e-0000-4000-8000-000000000001\n").unwrap();
        let hint = FormatHint::FlatId { format: IdFormat::Uuid };
        let t = target(path.clone(), ArtifactKind::FlatFile, hint);

        let fresh = scan_one(&t, &HashSet::new(), Duration::from_millis(50));
        assert_eq!(fresh.matched_entries.len(), 1);

        let issued: HashSet<String> =
            [ledger::fingerprint(&path, FLAT_FIELD, "4c1a9f3e-0000-4000-8000-000000000001")].into_iter().collect();
        assert!(scan_one(&t, &issued, Duration::from_millis(50)).matched_entries.is_empty());
    }

    #[test]
    fn missing_artifacts_report_absent() {
        let dir = tempfile::tempdir().unwrap();
        let hint = FormatHint::FlatId { format: IdFormat::Uuid };
        let finding = scan_one(
            &target(dir.path().join("nope"), ArtifactKind::FlatFile, hint),
            &HashSet::new(),
            Duration::from_millis(50),
        );
        assert!(!finding.exists);
        assert!(!finding.is_actionable());
    }

    #[test]
    fn wildcard_segments_expand_to_existing_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["IntelliJIdea2024.1", "PyCharm2023.3"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("PermanentDeviceId"), "x").unwrap();
        let hint = FormatHint::TextColumns { key_patterns: vec!["%augment%".into()] };
        let expanded = expand_wildcards(target(dir.path().join("*").join("usage.db"), ArtifactKind::EmbeddedDb, hint.clone()));
        let paths: Vec<PathBuf> = expanded.iter().map(|t| t.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                dir.path().join("IntelliJIdea2024.1/usage.db"),
                dir.path().join("PyCharm2023.3/usage.db")
            ]
        );

        let empty = tempfile::tempdir().unwrap();
        let literal = empty.path().join("*").join("usage.db");
        let kept = expand_wildcards(target(literal.clone(), ArtifactKind::EmbeddedDb, hint));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, literal);
        assert!(!scan_one(&kept[0], &HashSet::new(), Duration::from_millis(50)).exists);
    }
}
