// src/utils.rs
// Small filesystem helpers shared by backup, restore and the strategies.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::digest::walk_relative;

/// Writes `bytes` to a sibling temp file and renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_sibling(path);
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Copies a directory tree. `dst` must not exist yet.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut bytes = 0;
    for (rel, is_dir) in walk_relative(src)? {
        let target = dst.join(&rel);
        if is_dir {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            bytes += fs::copy(src.join(&rel), &target)?;
        }
    }
    Ok(bytes)
}

/// Removes a file or a directory tree; a missing path is fine.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Absolute path flattened into a relative one, e.g. `C:\Users\a` -> `C/Users/a`.
pub fn relative_mirror(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => {
                let drive: String = prefix
                    .as_os_str()
                    .to_string_lossy()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect();
                if !drive.is_empty() {
                    out.push(drive);
                }
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
        }
    }
    out
}

/// True when `name` is a single ordinary path component.
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_drops_roots() {
        assert_eq!(
            relative_mirror(Path::new("/home/a/.config/Code/machineid")),
            PathBuf::from("home/a/.config/Code/machineid")
        );
    }

    #[test]
    fn plain_names_only() {
        assert!(is_plain_name("a1b2c3"));
        assert!(!is_plain_name("../etc"));
        assert!(!is_plain_name("a/b"));
        assert!(!is_plain_name(""));
    }

    #[test]
    fn copy_and_remove_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/f.txt"), b"abc").unwrap();

        let dst = dir.path().join("dst");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 3);
        assert_eq!(fs::read(dst.join("nested/f.txt")).unwrap(), b"abc");

        remove_path(&dst).unwrap();
        assert!(!dst.exists());
        remove_path(&dst).unwrap();
    }
}
