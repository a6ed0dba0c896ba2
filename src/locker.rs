// src/locker.rs
// Marks identity files read-only so the host product cannot quietly rewrite them.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct LockResult {
    pub locked: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl LockResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub fn is_locked(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(unix)]
fn set_locked(path: &Path, locked: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    let new_mode = if locked { mode & !0o222 } else { mode | 0o200 };
    perms.set_mode(new_mode);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_locked(path: &Path, locked: bool) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(locked);
    fs::set_permissions(path, perms)
}

/// Makes each path read-only. Failures are collected, not fatal.
pub fn lock(paths: &[PathBuf]) -> LockResult {
    let mut result = LockResult::default();
    for path in paths {
        match set_locked(path, true) {
            Ok(()) => {
                debug!("Locked {}", path.display());
                result.locked.push(path.clone());
            }
            Err(e) => {
                warn!("Could not lock {}: {}", path.display(), e);
                result.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    info!("Locked {}/{} files", result.locked.len(), paths.len());
    result
}

/// Restores owner write permission. A missing file is not an error.
pub fn unlock(path: &Path) -> std::io::Result<()> {
    if !path.exists() || !is_locked(path) {
        return Ok(());
    }
    set_locked(path, false)?;
    debug!("Unlocked {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_unlock_toggles_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("PermanentDeviceId");
        fs::write(&file, "id").unwrap();

        let result = lock(&[file.clone()]);
        assert!(result.is_complete());
        assert!(is_locked(&file));

        unlock(&file).unwrap();
        assert!(!is_locked(&file));
        fs::write(&file, "new").unwrap();
    }

    #[test]
    fn locking_a_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = lock(&[dir.path().join("absent")]);
        assert_eq!(result.failed.len(), 1);
        assert!(unlock(&dir.path().join("absent")).is_ok());
    }
}
