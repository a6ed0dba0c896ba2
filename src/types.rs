// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// --- Platforms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Macos,
    Linux,
    Other,
}

impl Os {
    pub fn current() -> Os {
        if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::Macos
        } else if cfg!(target_os = "linux") {
            Os::Linux
        } else {
            Os::Other
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Os::Windows => "windows",
            Os::Macos => "macos",
            Os::Linux => "linux",
            Os::Other => "unsupported platform",
        };
        f.write_str(name)
    }
}

// --- Registry model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FlatFile,
    JsonFile,
    EmbeddedDb,
    WorkspaceRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdFormat {
    /// Lower-case hyphenated UUID v4.
    Uuid,
    /// `{XXXXXXXX-XXXX-...}` upper-case GUID, as used by `telemetry.sqmId`.
    BracedUpperUuid,
    /// 64 lower-case hex characters from 32 random bytes.
    Hex64,
    /// SHA-256 hex digest of a random UUID.
    Sha256Hex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityField {
    pub key: String,
    pub format: IdFormat,
}

/// Table/column pair holding key/value records inside an embedded database.
/// Patterns use `\` as the `LIKE` escape character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTable {
    pub table: String,
    pub key_column: String,
    /// SQL `LIKE` patterns selecting tracked record keys.
    pub key_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormatHint {
    FlatId { format: IdFormat },
    JsonKeys { fields: Vec<IdentityField> },
    Records(RecordTable),
    /// SQLite file of unknown schema: every text column is matched.
    TextColumns { key_patterns: Vec<String> },
    Workspaces {
        /// File or directory names inside a workspace that belong to the product.
        marker_entries: Vec<String>,
        db_file: String,
        records: RecordTable,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
    pub kind: ArtifactKind,
    /// `/`-separated template, first segment may be `{home}`, `{config}` or `{data}`.
    pub path_template: String,
    pub format_hint: FormatHint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductTarget {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub process_names: Vec<String>,
    pub os_path_templates: BTreeMap<Os, Vec<PathSpec>>,
}

/// A `PathSpec` with its template expanded against the live roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub product_id: String,
    pub spec: PathSpec,
    pub path: PathBuf,
}

// --- Scan model ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchedEntry {
    IdentityField { field: String, old_value: String },
    Record { key: String },
    Cell { table: String, column: String, value: String },
    Workspace {
        name: String,
        marker_entries: Vec<String>,
        record_keys: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanWarning {
    Parse { path: PathBuf, message: String },
    Busy { path: PathBuf },
    Io { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub product_id: String,
    pub path_spec: PathSpec,
    pub path: PathBuf,
    pub exists: bool,
    pub matched_entries: Vec<MatchedEntry>,
    /// Sub-items looked at (workspace folders, records); informational only.
    #[serde(default)]
    pub probed: usize,
    #[serde(default)]
    pub warnings: Vec<ScanWarning>,
}

impl ScanFinding {
    pub fn is_actionable(&self) -> bool {
        self.exists && !self.matched_entries.is_empty()
    }
}

// --- Plan model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FingerprintReset,
    DatabasePrune,
    WorkspacePrune,
    NetworkAdvisory,
}

impl Strategy {
    pub fn for_kind(kind: ArtifactKind) -> Strategy {
        match kind {
            ArtifactKind::FlatFile | ArtifactKind::JsonFile => Strategy::FingerprintReset,
            ArtifactKind::EmbeddedDb => Strategy::DatabasePrune,
            ArtifactKind::WorkspaceRoot => Strategy::WorkspacePrune,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSet {
    pub fingerprint: bool,
    pub database: bool,
    pub workspace: bool,
    pub advisory: bool,
}

impl Default for LayerSet {
    fn default() -> Self {
        LayerSet {
            fingerprint: true,
            database: true,
            workspace: true,
            advisory: false,
        }
    }
}

impl LayerSet {
    pub fn allows(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::FingerprintReset => self.fingerprint,
            Strategy::DatabasePrune => self.database,
            Strategy::WorkspacePrune => self.workspace,
            Strategy::NetworkAdvisory => self.advisory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanOptions {
    /// `None` selects every product present in the scan.
    pub products: Option<Vec<String>>,
    pub layers: LayerSet,
    pub backup: bool,
    pub lock: bool,
    pub dry_run: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        CleanOptions {
            products: None,
            layers: LayerSet::default(),
            backup: true,
            lock: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub product_id: String,
    pub strategy: Strategy,
    /// Absent only for the advisory step.
    pub finding: Option<ScanFinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationPlan {
    pub steps: Vec<PlannedStep>,
    pub options: CleanOptions,
}

impl MutationPlan {
    pub fn mutating_steps(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(|s| s.finding.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.mutating_steps().next().is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationResult {
    pub changed_entries: Vec<String>,
    pub errors: Vec<String>,
    /// Identifier values written, as `(field, new_value)`.
    #[serde(default)]
    pub issued: Vec<(String, String)>,
}

// --- Backup model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub original_path: PathBuf,
    /// Relative to the backup set directory.
    pub backup_path: PathBuf,
    pub kind: EntryKind,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOrigin {
    Run,
    PreRestore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSet {
    pub id: String,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
    pub origin: BackupOrigin,
    pub entries: Vec<BackupEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub id: String,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
    pub origin: BackupOrigin,
    pub entry_count: usize,
    pub total_bytes: u64,
}
