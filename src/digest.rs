// src/digest.rs
// SHA-256 checksums for single files and whole directory trees.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::types::EntryKind;

pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// All entries below `root`, relative and sorted. Directories are listed too so
/// empty folders count toward the digest.
pub fn walk_relative(root: &Path) -> io::Result<Vec<(PathBuf, bool)>> {
    let mut out = Vec::new();
    walk_inner(root, Path::new(""), &mut out)?;
    out.sort();
    Ok(out)
}

fn walk_inner(abs: &Path, rel: &Path, out: &mut Vec<(PathBuf, bool)>) -> io::Result<()> {
    for entry in fs::read_dir(abs)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let child_rel = rel.join(entry.file_name());
        if file_type.is_dir() {
            out.push((child_rel.clone(), true));
            walk_inner(&entry.path(), &child_rel, out)?;
        } else if file_type.is_file() {
            out.push((child_rel, false));
        }
        // Symlinks and special files are not part of any artifact we manage.
    }
    Ok(())
}

/// Digest over relative paths and file contents of a tree.
pub fn tree_sha256(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for (rel, is_dir) in walk_relative(root)? {
        // Normalise separators so a digest means the same thing on every OS.
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if is_dir {
            hasher.update(b"d ");
            hasher.update(rel_str.as_bytes());
            hasher.update(b"\n");
        } else {
            hasher.update(b"f ");
            hasher.update(rel_str.as_bytes());
            hasher.update(b" ");
            hasher.update(file_sha256(&root.join(&rel))?.as_bytes());
            hasher.update(b"\n");
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn checksum(path: &Path, kind: EntryKind) -> io::Result<String> {
    match kind {
        EntryKind::File => file_sha256(path),
        EntryKind::Tree => tree_sha256(path),
    }
}
