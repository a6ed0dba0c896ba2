// src/process.rs
// Detects whether a target product is currently running.

use std::collections::HashSet;
#[cfg(not(target_os = "linux"))]
use std::process::Command;
use tracing::{debug, warn};

use crate::types::ProductTarget;

/// Answers "is this product running?" for the coordinator.
pub trait ProcessProbe: Send + Sync {
    /// The name of a matching running process, if any.
    fn running_process(&self, product: &ProductTarget) -> Option<String>;
}

/// Probe backed by the operating system's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn running_process(&self, product: &ProductTarget) -> Option<String> {
        let running = match running_process_names() {
            Ok(names) => names,
            Err(e) => {
                // No process list means we cannot tell; let the run proceed.
                warn!("Could not list running processes: {}", e);
                return None;
            }
        };
        product
            .process_names
            .iter()
            .find(|wanted| running.iter().any(|name| names_match(wanted, name)))
            .cloned()
    }
}

// Linux truncates `comm` to 15 bytes; Windows names are case-insensitive.
fn names_match(wanted: &str, running: &str) -> bool {
    if cfg!(windows) {
        return wanted.eq_ignore_ascii_case(running);
    }
    wanted == running || (running.len() == 15 && wanted.starts_with(running))
}

#[cfg(target_os = "linux")]
fn running_process_names() -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let is_pid = entry
            .file_name()
            .to_str()
            .map(|s| s.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if !is_pid {
            continue;
        }
        // Processes can exit between read_dir and read; skip those.
        if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
            names.insert(comm.trim_end().to_string());
        }
    }
    debug!("Found {} running processes", names.len());
    Ok(names)
}

#[cfg(target_os = "macos")]
fn running_process_names() -> std::io::Result<HashSet<String>> {
    let output = Command::new("ps").args(["-axo", "comm="]).output()?;
    let names: HashSet<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().rsplit('/').next().map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect();
    debug!("Found {} running processes", names.len());
    Ok(names)
}

#[cfg(windows)]
fn running_process_names() -> std::io::Result<HashSet<String>> {
    let output = Command::new("tasklist").args(["/FO", "CSV", "/NH"]).output()?;
    let names: HashSet<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split("\",\"").next())
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
        .collect();
    debug!("Found {} running processes", names.len());
    Ok(names)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn running_process_names() -> std::io::Result<HashSet<String>> {
    let output = Command::new("ps").args(["-axo", "comm="]).output()?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn truncated_comm_names_still_match() {
        assert!(names_match("code", "code"));
        assert!(names_match("code-insiders-long-name", "code-insiders-l"));
        assert!(!names_match("code", "codium"));
    }
}
