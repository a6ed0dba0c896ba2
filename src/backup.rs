// src/backup.rs
// Backup sets: checksum-verified copies of every artifact a run is about to
// touch, plus restore, listing, retention and the single-flight run lock.

use chrono::Utc;
use fs4::FileExt;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::digest::{checksum, file_sha256};
use crate::error::{ResetError, Result};
use crate::ledger;
use crate::locker;
use crate::report::{EntryFailure, ReportedError, RestoreReport};
use crate::types::{
    ArtifactKind, BackupEntry, BackupOrigin, BackupSet, BackupSummary, EntryKind, MatchedEntry,
    ScanFinding,
};
use crate::utils::{copy_tree, relative_mirror, remove_path, temp_sibling};

pub const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";
const RUN_LOCK_FILE: &str = ".run.lock";

// --- Run lock ---

/// Exclusive advisory lock on `<backups>/.run.lock`, held for a whole run or
/// restore. Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(backup_root: &Path) -> Result<RunLock> {
        fs::create_dir_all(backup_root).map_err(|e| ResetError::io(backup_root, e))?;
        let path = backup_root.join(RUN_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResetError::io(&path, e))?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired run lock {}", path.display());
                Ok(RunLock { _file: file, path })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(ResetError::RunInProgress(path)),
            Err(e) => {
                warn!("Run lock error on {}: {}", path.display(), e);
                Err(ResetError::RunInProgress(path))
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// --- Snapshot ---

// Paths a strategy will modify for this finding.
pub fn targets_for(finding: &ScanFinding) -> Vec<(PathBuf, EntryKind)> {
    match finding.path_spec.kind {
        ArtifactKind::FlatFile | ArtifactKind::JsonFile => vec![(finding.path.clone(), EntryKind::File)],
        ArtifactKind::EmbeddedDb => {
            let mut targets = vec![(finding.path.clone(), EntryKind::File)];
            let wal = sidecar(&finding.path, "-wal");
            if wal.is_file() {
                targets.push((wal, EntryKind::File));
            }
            targets
        }
        ArtifactKind::WorkspaceRoot => finding
            .matched_entries
            .iter()
            .filter_map(|entry| match entry {
                MatchedEntry::Workspace { name, .. } => Some((finding.path.join(name), EntryKind::Tree)),
                _ => None,
            })
            .collect(),
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn snapshot(ctx: &Context, product_id: &str, findings: &[&ScanFinding]) -> Result<BackupSet> {
    let targets: Vec<(PathBuf, EntryKind)> = findings.iter().flat_map(|f| targets_for(f)).collect();
    snapshot_paths(ctx, product_id, &targets, BackupOrigin::Run)
}

/// Copies `targets` into a new backup set. All-or-nothing: on any failure the
/// partial set directory is removed and `BackupIo` returned.
pub fn snapshot_paths(
    ctx: &Context,
    product_id: &str,
    targets: &[(PathBuf, EntryKind)],
    origin: BackupOrigin,
) -> Result<BackupSet> {
    let created_at = Utc::now();
    let base_id = format!("{}_{}", created_at.format("%Y%m%d_%H%M%S_%6f"), product_id);
    let mut id = base_id.clone();
    let mut n = 1;
    while ctx.backup_root.join(&id).exists() {
        id = format!("{base_id}-{n}");
        n += 1;
    }
    let set_dir = ctx.backup_root.join(&id);
    info!("Creating backup set {} ({} target(s))", id, targets.len());

    let mut set = BackupSet {
        id,
        product_id: product_id.to_string(),
        created_at,
        origin,
        entries: Vec::new(),
    };
    match write_set(&set_dir, &mut set, targets) {
        Ok(()) => Ok(set),
        Err((path, source)) => {
            error!("Backup of {} failed: {}", path.display(), source);
            if let Err(e) = remove_path(&set_dir) {
                warn!("Could not remove partial backup {}: {}", set_dir.display(), e);
            }
            Err(ResetError::BackupIo { path, source })
        }
    }
}

fn write_set(
    set_dir: &Path,
    set: &mut BackupSet,
    targets: &[(PathBuf, EntryKind)],
) -> std::result::Result<(), (PathBuf, io::Error)> {
    let files_dir = set_dir.join(FILES_DIR);
    fs::create_dir_all(&files_dir).map_err(|e| (files_dir.clone(), e))?;

    let mut seen = BTreeSet::new();
    for (original, kind) in targets {
        if !seen.insert(original.clone()) {
            continue;
        }
        let relative = Path::new(FILES_DIR).join(relative_mirror(original));
        let copy = set_dir.join(&relative);
        let at = |e: io::Error| (original.clone(), e);

        let source_sum = checksum(original, *kind).map_err(at)?;
        if let Some(parent) = copy.parent() {
            fs::create_dir_all(parent).map_err(at)?;
        }
        let size = match kind {
            EntryKind::File => fs::copy(original, &copy).map_err(at)?,
            EntryKind::Tree => copy_tree(original, &copy).map_err(at)?,
        };
        let copy_sum = checksum(&copy, *kind).map_err(at)?;
        if copy_sum != source_sum {
            return Err(at(io::Error::new(
                ErrorKind::InvalidData,
                "copy does not match the original (file changed during backup?)",
            )));
        }
        debug!("Backed up {} -> {}", original.display(), relative.display());
        set.entries.push(BackupEntry {
            original_path: original.clone(),
            backup_path: relative,
            kind: *kind,
            checksum: source_sum,
            size,
        });
    }

    let manifest_path = set_dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(set)
        .map_err(|e| (manifest_path.clone(), io::Error::new(ErrorKind::InvalidData, e)))?;
    fs::write(&manifest_path, json).map_err(|e| (manifest_path.clone(), e))?;
    Ok(())
}

// --- Load / list ---

pub fn load_set(ctx: &Context, id: &str) -> Result<BackupSet> {
    if id.is_empty() || id.starts_with('.') || !crate::utils::is_plain_name(id) {
        return Err(ResetError::BackupSetNotFound(id.to_string()));
    }
    let manifest = ctx.backup_root.join(id).join(MANIFEST_FILE);
    let bytes = match fs::read(&manifest) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(ResetError::BackupSetNotFound(id.to_string())),
        Err(e) => return Err(ResetError::io(&manifest, e)),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

// Newest first; unreadable sets are skipped.
pub fn list(ctx: &Context) -> Result<Vec<BackupSummary>> {
    let entries = match fs::read_dir(&ctx.backup_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ResetError::io(&ctx.backup_root, e)),
    };
    let mut summaries = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        match load_set(ctx, &name) {
            Ok(set) => summaries.push(BackupSummary {
                entry_count: set.entries.len(),
                total_bytes: set.entries.iter().map(|e| e.size).sum(),
                id: set.id,
                product_id: set.product_id,
                created_at: set.created_at,
                origin: set.origin,
            }),
            Err(e) => warn!("Skipping unreadable backup set {}: {}", name, e),
        }
    }
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(summaries)
}

/// Deletes sets beyond the newest `keep`, never touching `protect`.
pub fn prune(ctx: &Context, keep: usize, protect: &[String]) -> Result<Vec<String>> {
    if keep == 0 {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for summary in list(ctx)?.into_iter().skip(keep) {
        if protect.contains(&summary.id) {
            continue;
        }
        let dir = ctx.backup_root.join(&summary.id);
        match remove_path(&dir) {
            Ok(()) => {
                info!("Pruned old backup set {}", summary.id);
                removed.push(summary.id);
            }
            Err(e) => warn!("Could not prune backup set {}: {}", summary.id, e),
        }
    }
    Ok(removed)
}

pub fn discard(ctx: &Context, ids: &[String]) {
    for id in ids {
        if let Err(e) = remove_path(&ctx.backup_root.join(id)) {
            warn!("Could not discard backup set {}: {}", id, e);
        }
    }
}

// --- Restore ---

/// Copies every entry of `sets` back, verifying checksums on both sides.
/// Failures are collected per entry; the caller holds the run lock. The
/// ledger is not touched.
pub fn restore_sets(ctx: &Context, sets: &[BackupSet]) -> RestoreReport {
    let mut report = RestoreReport::default();
    for set in sets {
        report.set_ids.push(set.id.clone());
        let set_dir = ctx.backup_root.join(&set.id);
        for entry in &set.entries {
            match restore_entry(&set_dir, entry) {
                Ok(()) => report.restored.push(entry.original_path.clone()),
                Err(e) => {
                    error!("Restore of {} failed: {}", entry.original_path.display(), e);
                    report.failures.push(EntryFailure {
                        path: entry.original_path.clone(),
                        error: ReportedError::from(&e),
                    });
                }
            }
        }
    }
    info!(
        "Restored {} entr(ies) from {} set(s), {} failure(s)",
        report.restored.len(),
        report.set_ids.len(),
        report.failures.len()
    );
    report
}

fn restore_entry(set_dir: &Path, entry: &BackupEntry) -> Result<()> {
    let original = &entry.original_path;
    let copy = set_dir.join(&entry.backup_path);
    let verification = |reason: String| ResetError::RestoreVerification {
        path: original.clone(),
        reason,
    };

    let copy_sum = checksum(&copy, entry.kind).map_err(|e| verification(format!("backup copy unreadable: {e}")))?;
    if copy_sum != entry.checksum {
        return Err(verification("backup copy does not match its manifest checksum".to_string()));
    }
    if let Some(parent) = original.parent() {
        fs::create_dir_all(parent).map_err(|e| ResetError::io(parent, e))?;
    }

    match entry.kind {
        EntryKind::File => {
            locker::unlock(original).map_err(|e| ResetError::io(original, e))?;
            let tmp = temp_sibling(original);
            fs::copy(&copy, &tmp).map_err(|e| ResetError::io(&tmp, e))?;
            if let Err(e) = fs::rename(&tmp, original) {
                let _ = fs::remove_file(&tmp);
                return Err(ResetError::io(original, e));
            }
            locker::unlock(original).map_err(|e| ResetError::io(original, e))?;
            let restored = file_sha256(original).map_err(|e| ResetError::io(original, e))?;
            if restored != entry.checksum {
                return Err(verification("restored file does not match the backup".to_string()));
            }
        }
        EntryKind::Tree => {
            remove_path(original).map_err(|e| ResetError::io(original, e))?;
            copy_tree(&copy, original).map_err(|e| ResetError::io(original, e))?;
            let restored = checksum(original, EntryKind::Tree).map_err(|e| ResetError::io(original, e))?;
            if restored != entry.checksum {
                return Err(verification("restored tree does not match the backup".to_string()));
            }
        }
    }
    debug!("Restored {}", original.display());
    Ok(())
}

/// Manual restore of one set. Unless `safety_backup` is off, the current state
/// of every entry is snapshotted first so the restore itself can be undone.
pub fn restore(ctx: &Context, id: &str, safety_backup: bool) -> Result<RestoreReport> {
    let _lock = RunLock::acquire(&ctx.backup_root)?;
    let set = load_set(ctx, id)?;
    ctx.ensure_stopped(&set.product_id)?;

    let mut safety_id = None;
    if safety_backup {
        let current: Vec<(PathBuf, EntryKind)> = set
            .entries
            .iter()
            .filter(|e| e.original_path.exists())
            .map(|e| (e.original_path.clone(), e.kind))
            .collect();
        if !current.is_empty() {
            let safety = snapshot_paths(ctx, &set.product_id, &current, BackupOrigin::PreRestore)?;
            safety_id = Some(safety.id);
        }
    }

    let mut report = restore_sets(ctx, std::slice::from_ref(&set));
    report.safety_backup = safety_id;

    // Identifiers issued after the snapshot are no longer on disk.
    let conn = ctx.state_db.lock();
    for path in &report.restored {
        if let Err(e) = ledger::forget_issued_since(&conn, path, set.created_at) {
            warn!("Could not update ledger for {}: {}", path.display(), e);
        }
    }
    Ok(report)
}
