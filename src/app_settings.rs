// src/app_settings.rs
use crate::error::{ResetError, Result};
use crate::types::{CleanOptions, LayerSet};
use crate::utils::is_plain_name;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tunables for scanning and cleaning. Defaults apply unless an override is
/// stored in the `app_settings` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    pub create_backups: bool,
    pub lock_files: bool,
    pub clean_database: bool,
    pub clean_workspace: bool,
    pub scan_concurrency: usize,
    pub db_busy_timeout_ms: u64,
    /// Backup sets to keep; 0 keeps everything.
    pub max_backups: usize,
    /// Extension ids (`publisher.name`) whose records and workspace entries are tracked.
    pub tracked_extensions: Vec<String>,
    /// `LIKE` patterns for tracked records in every product database,
    /// workspace databases included.
    pub tracked_key_patterns: Vec<String>,
    /// Names inside a workspace folder that belong to the tracked product.
    pub workspace_markers: Vec<String>,
    /// Additional `LIKE` patterns for global (non-workspace) databases.
    pub extra_key_patterns: Vec<String>,
}

// SQLite's LIKE ignores ASCII case, so one pattern covers augment/Augment/AUGMENT.
const DEFAULT_TRACKED_EXTENSIONS: &[&str] = &["augment.vscode-augment"];
const DEFAULT_KEY_PATTERNS: &[&str] = &["%augment%"];
const DEFAULT_WORKSPACE_MARKERS: &[&str] = &[
    "augmentcode.augment",
    "augmentcode",
    "augment",
    "augment.json",
    "augmentcode.json",
    ".augment",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            create_backups: true,
            lock_files: false,
            clean_database: true,
            clean_workspace: true,
            scan_concurrency: 4,
            db_busy_timeout_ms: 2000,
            max_backups: 10,
            tracked_extensions: strings(DEFAULT_TRACKED_EXTENSIONS),
            tracked_key_patterns: strings(DEFAULT_KEY_PATTERNS),
            workspace_markers: strings(DEFAULT_WORKSPACE_MARKERS),
            extra_key_patterns: Vec::new(),
        }
    }
}

pub const SETTING_KEYS: &[&str] = &[
    "create_backups",
    "lock_files",
    "clean_database",
    "clean_workspace",
    "scan_concurrency",
    "db_busy_timeout_ms",
    "max_backups",
    "tracked_extensions",
    "tracked_key_patterns",
    "workspace_markers",
    "extra_key_patterns",
];

impl AppSettings {
    /// Defaults overlaid with whatever overrides the state database holds.
    /// An unparsable stored value is skipped with a warning.
    pub fn load(conn: &Connection) -> Result<AppSettings> {
        let mut settings = AppSettings::default();
        for key in SETTING_KEYS {
            if let Some(value) = get_setting_internal(conn, key)? {
                if let Err(e) = settings.apply(key, &value) {
                    warn!("Ignoring stored setting '{}': {}", key, e);
                }
            }
        }
        Ok(settings)
    }

    /// Applies one textual override. Lists are JSON arrays of strings.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let bad = |what: &str| ResetError::InvalidOptions(format!("{key}: expected {what}, got '{value}'"));
        match key {
            "create_backups" => self.create_backups = value.parse().map_err(|_| bad("true/false"))?,
            "lock_files" => self.lock_files = value.parse().map_err(|_| bad("true/false"))?,
            "clean_database" => self.clean_database = value.parse().map_err(|_| bad("true/false"))?,
            "clean_workspace" => self.clean_workspace = value.parse().map_err(|_| bad("true/false"))?,
            "scan_concurrency" => {
                let n: usize = value.parse().map_err(|_| bad("a positive integer"))?;
                if n == 0 {
                    return Err(bad("a positive integer"));
                }
                self.scan_concurrency = n;
            }
            "db_busy_timeout_ms" => self.db_busy_timeout_ms = value.parse().map_err(|_| bad("milliseconds"))?,
            "max_backups" => self.max_backups = value.parse().map_err(|_| bad("an integer"))?,
            "tracked_extensions" => {
                self.tracked_extensions = serde_json::from_str(value).map_err(|_| bad("a JSON string array"))?
            }
            "tracked_key_patterns" => {
                self.tracked_key_patterns = serde_json::from_str(value).map_err(|_| bad("a JSON string array"))?
            }
            "workspace_markers" => {
                let markers: Vec<String> = serde_json::from_str(value).map_err(|_| bad("a JSON string array"))?;
                if !markers.iter().all(|m| is_plain_name(m)) {
                    return Err(bad("plain file or directory names"));
                }
                self.workspace_markers = markers;
            }
            "extra_key_patterns" => {
                self.extra_key_patterns = serde_json::from_str(value).map_err(|_| bad("a JSON string array"))?
            }
            _ => return Err(ResetError::InvalidOptions(format!("unknown setting '{key}'"))),
        }
        Ok(())
    }

    // Before any command-line flags.
    pub fn clean_defaults(&self) -> CleanOptions {
        CleanOptions {
            products: None,
            layers: LayerSet {
                database: self.clean_database,
                workspace: self.clean_workspace,
                ..LayerSet::default()
            },
            backup: self.create_backups,
            lock: self.lock_files,
            dry_run: false,
        }
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        let value = match key {
            "create_backups" => self.create_backups.to_string(),
            "lock_files" => self.lock_files.to_string(),
            "clean_database" => self.clean_database.to_string(),
            "clean_workspace" => self.clean_workspace.to_string(),
            "scan_concurrency" => self.scan_concurrency.to_string(),
            "db_busy_timeout_ms" => self.db_busy_timeout_ms.to_string(),
            "max_backups" => self.max_backups.to_string(),
            "tracked_extensions" => serde_json::to_string(&self.tracked_extensions).ok()?,
            "tracked_key_patterns" => serde_json::to_string(&self.tracked_key_patterns).ok()?,
            "workspace_markers" => serde_json::to_string(&self.workspace_markers).ok()?,
            "extra_key_patterns" => serde_json::to_string(&self.extra_key_patterns).ok()?,
            _ => return None,
        };
        Some(value)
    }
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    // Validate against a scratch copy so bad values never reach the table.
    AppSettings::default().apply(key, value)?;
    conn.execute(
        "INSERT OR REPLACE INTO app_settings (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_setting_internal(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE app_settings (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);")
            .unwrap();
        conn
    }

    #[test]
    fn overrides_are_applied_over_defaults() {
        let conn = conn();
        set_setting(&conn, "max_backups", "3").unwrap();
        set_setting(&conn, "tracked_extensions", r#"["acme.helper"]"#).unwrap();

        let settings = AppSettings::load(&conn).unwrap();
        assert_eq!(settings.max_backups, 3);
        assert_eq!(settings.tracked_extensions, vec!["acme.helper".to_string()]);
        assert!(settings.create_backups);
    }

    #[test]
    fn invalid_values_are_rejected_before_storage() {
        let conn = conn();
        assert!(set_setting(&conn, "scan_concurrency", "0").is_err());
        assert!(set_setting(&conn, "lock_files", "sometimes").is_err());
        assert!(set_setting(&conn, "no_such_key", "1").is_err());
        assert_eq!(get_setting_internal(&conn, "scan_concurrency").unwrap(), None);
    }

    #[test]
    fn value_of_round_trips_through_apply() {
        let mut settings = AppSettings::default();
        settings.apply("extra_key_patterns", r#"["%acme%"]"#).unwrap();
        assert_eq!(settings.value_of("extra_key_patterns").unwrap(), r#"["%acme%"]"#);
        assert_eq!(settings.value_of("bogus"), None);
    }

    #[test]
    fn defaults_track_augment_state() {
        let settings = AppSettings::default();
        assert_eq!(settings.tracked_key_patterns, vec!["%augment%".to_string()]);
        assert!(settings.workspace_markers.contains(&"augmentcode.augment".to_string()));
        assert!(settings.workspace_markers.contains(&".augment".to_string()));
        assert!(AppSettings::default().apply("workspace_markers", r#"["../escape"]"#).is_err());
    }
}
