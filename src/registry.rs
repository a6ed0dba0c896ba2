// src/registry.rs
//! Path registry: which products exist and where each keeps its identity state.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::app_settings::AppSettings;
use crate::error::{ResetError, Result};
use crate::records::escape_like;
use crate::types::{
    ArtifactKind, FormatHint, IdFormat, IdentityField, Os, PathSpec, ProductTarget, RecordTable,
    ResolvedPath,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub home: PathBuf,
    pub config: PathBuf,
    pub data: PathBuf,
}

impl Roots {
    pub fn from_env(os: Os) -> Result<Roots> {
        let var = |name: &str| env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
        let home = match os {
            Os::Windows => var("USERPROFILE").or_else(|| var("HOME")),
            _ => var("HOME"),
        }
        .ok_or(ResetError::MissingRoot { root: "home" })?;

        let (config, data) = match os {
            Os::Windows => (
                var("APPDATA").ok_or(ResetError::MissingRoot { root: "APPDATA" })?,
                var("LOCALAPPDATA").ok_or(ResetError::MissingRoot { root: "LOCALAPPDATA" })?,
            ),
            Os::Macos => {
                let support = home.join("Library").join("Application Support");
                (support.clone(), support)
            }
            Os::Linux | Os::Other => (
                var("XDG_CONFIG_HOME").unwrap_or_else(|| home.join(".config")),
                var("XDG_DATA_HOME").unwrap_or_else(|| home.join(".local").join("share")),
            ),
        };
        Ok(Roots { home, config, data })
    }

    /// Roots nested under one directory; what tests and sandboxed runs use.
    pub fn under(base: &Path) -> Roots {
        Roots {
            home: base.join("home"),
            config: base.join("config"),
            data: base.join("data"),
        }
    }

    fn lookup(&self, token: &str) -> Option<&Path> {
        match token {
            "{home}" => Some(&self.home),
            "{config}" => Some(&self.config),
            "{data}" => Some(&self.data),
            _ => None,
        }
    }
}

/// Expands a `/`-separated template against `roots`. A `*` segment is kept
/// as is; the scanner expands it against the directories on disk.
pub fn expand_template(template: &str, roots: &Roots) -> Result<PathBuf> {
    let invalid = |reason: &str| ResetError::Template {
        template: template.to_string(),
        reason: reason.to_string(),
    };
    let mut segments = template.split('/').filter(|s| !s.is_empty());
    let first = segments.next().ok_or_else(|| invalid("empty template"))?;
    let mut path = roots
        .lookup(first)
        .ok_or_else(|| invalid("must start with {home}, {config} or {data}"))?
        .to_path_buf();
    for segment in segments {
        if segment.starts_with('{') || segment == ".." {
            return Err(invalid("roots may only appear first and '..' is not allowed"));
        }
        path.push(segment);
    }
    Ok(path)
}

// --- Built-in product table ---

const VSCODE_FAMILY: &[(&str, &str, &str, &[&str])] = &[
    ("vscode", "Visual Studio Code", "Code", &["code", "Code", "Code.exe"]),
    (
        "vscode-insiders",
        "Visual Studio Code - Insiders",
        "Code - Insiders",
        &["code-insiders", "Code - Insiders", "Code - Insiders.exe"],
    ),
    ("vscodium", "VSCodium", "VSCodium", &["codium", "VSCodium", "VSCodium.exe"]),
    ("cursor", "Cursor", "Cursor", &["cursor", "Cursor", "Cursor.exe"]),
];

const JETBRAINS_PROCESSES: &[&str] = &[
    "idea", "idea64.exe", "pycharm", "pycharm64.exe", "webstorm", "webstorm64.exe", "goland",
    "goland64.exe", "clion", "clion64.exe", "rider", "rider64.exe", "phpstorm", "phpstorm64.exe",
    "rubymine", "rubymine64.exe", "datagrip", "datagrip64.exe",
];

/// Record keys VS Code-family editors use for install/session tracking.
const GLOBAL_KEY_PATTERNS: &[&str] = &["telemetry.%", "storage.serviceMachineId"];

// Found under each versioned IDE directory, e.g. `JetBrains/IntelliJIdea2024.1`.
const JETBRAINS_DATABASES: &[&str] = &[
    "app-internal-state.db",
    "updatedBrokenPlugins.db",
    "statistics.db",
    "usage.db",
    "device.db",
];

fn telemetry_fields() -> Vec<IdentityField> {
    [
        ("telemetry.machineId", IdFormat::Hex64),
        ("telemetry.devDeviceId", IdFormat::Uuid),
        ("telemetry.macMachineId", IdFormat::Sha256Hex),
        ("telemetry.sqmId", IdFormat::BracedUpperUuid),
    ]
    .into_iter()
    .map(|(key, format)| IdentityField {
        key: key.to_string(),
        format,
    })
    .collect()
}

// Patterns for product-tagged records, shared by global and workspace databases.
fn tracked_patterns(settings: &AppSettings) -> Vec<String> {
    let mut patterns = settings.tracked_key_patterns.clone();
    patterns.extend(
        settings
            .tracked_extensions
            .iter()
            .map(|ext| format!("%{}%", escape_like(ext))),
    );
    patterns
}

fn vscode_specs(base: &str, settings: &AppSettings) -> Vec<PathSpec> {
    let mut global_patterns: Vec<String> = GLOBAL_KEY_PATTERNS.iter().map(|p| p.to_string()).collect();
    global_patterns.extend(tracked_patterns(settings));
    global_patterns.extend(settings.extra_key_patterns.iter().cloned());

    let mut marker_entries: Vec<String> = settings
        .tracked_extensions
        .iter()
        .flat_map(|ext| [ext.clone(), format!("{ext}.json")])
        .collect();
    for marker in &settings.workspace_markers {
        if !marker_entries.contains(marker) {
            marker_entries.push(marker.clone());
        }
    }

    vec![
        PathSpec {
            kind: ArtifactKind::JsonFile,
            path_template: format!("{base}/User/globalStorage/storage.json"),
            format_hint: FormatHint::JsonKeys {
                fields: telemetry_fields(),
            },
        },
        PathSpec {
            kind: ArtifactKind::FlatFile,
            path_template: format!("{base}/machineid"),
            format_hint: FormatHint::FlatId {
                format: IdFormat::Uuid,
            },
        },
        PathSpec {
            kind: ArtifactKind::EmbeddedDb,
            path_template: format!("{base}/User/globalStorage/state.vscdb"),
            format_hint: FormatHint::Records(RecordTable {
                table: "ItemTable".to_string(),
                key_column: "key".to_string(),
                key_patterns: global_patterns,
            }),
        },
        PathSpec {
            kind: ArtifactKind::WorkspaceRoot,
            path_template: format!("{base}/User/workspaceStorage"),
            format_hint: FormatHint::Workspaces {
                marker_entries,
                db_file: "state.vscdb".to_string(),
                records: RecordTable {
                    table: "ItemTable".to_string(),
                    key_column: "key".to_string(),
                    key_patterns: tracked_patterns(settings),
                },
            },
        },
    ]
}

fn jetbrains_specs(settings: &AppSettings) -> Vec<PathSpec> {
    let mut specs: Vec<PathSpec> = ["PermanentDeviceId", "PermanentUserId"]
        .into_iter()
        .map(|name| PathSpec {
            kind: ArtifactKind::FlatFile,
            path_template: format!("{{config}}/JetBrains/{name}"),
            format_hint: FormatHint::FlatId {
                format: IdFormat::Uuid,
            },
        })
        .collect();

    let mut patterns = tracked_patterns(settings);
    patterns.extend(settings.extra_key_patterns.iter().cloned());
    specs.extend(JETBRAINS_DATABASES.iter().map(|db| PathSpec {
        kind: ArtifactKind::EmbeddedDb,
        path_template: format!("{{config}}/JetBrains/*/{db}"),
        format_hint: FormatHint::TextColumns {
            key_patterns: patterns.clone(),
        },
    }));
    specs
}

/// Products known out of the box. Tracked extensions from `settings` feed the
/// record patterns and workspace markers.
pub fn builtin_products(settings: &AppSettings) -> Vec<ProductTarget> {
    let mut products = Vec::new();
    for (id, display, dir, processes) in VSCODE_FAMILY {
        let mut templates = BTreeMap::new();
        for os in [Os::Windows, Os::Macos, Os::Linux] {
            templates.insert(os, vscode_specs(&format!("{{config}}/{dir}"), settings));
        }
        products.push(ProductTarget {
            id: id.to_string(),
            display_name: display.to_string(),
            process_names: processes.iter().map(|p| p.to_string()).collect(),
            os_path_templates: templates,
        });
    }

    let mut templates = BTreeMap::new();
    for os in [Os::Windows, Os::Macos, Os::Linux] {
        templates.insert(os, jetbrains_specs(settings));
    }
    products.push(ProductTarget {
        id: "jetbrains".to_string(),
        display_name: "JetBrains IDEs".to_string(),
        process_names: JETBRAINS_PROCESSES.iter().map(|p| p.to_string()).collect(),
        os_path_templates: templates,
    });
    products
}

#[derive(Debug, Clone)]
pub struct Registry {
    products: Vec<ProductTarget>,
    roots: Roots,
}

impl Registry {
    pub fn new(products: Vec<ProductTarget>, roots: Roots) -> Registry {
        Registry { products, roots }
    }

    pub fn products(&self) -> &[ProductTarget] {
        &self.products
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn product(&self, id: &str) -> Result<&ProductTarget> {
        self.products
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ResetError::UnknownProduct(id.to_string()))
    }

    /// Candidate artifact locations for `product_id` on `os`.
    pub fn resolve(&self, product_id: &str, os: Os) -> Result<Vec<ResolvedPath>> {
        let product = self.product(product_id)?;
        let specs = product
            .os_path_templates
            .get(&os)
            .filter(|specs| !specs.is_empty())
            .ok_or_else(|| ResetError::UnsupportedOs {
                product: product_id.to_string(),
                os,
            })?;
        specs
            .iter()
            .map(|spec| {
                Ok(ResolvedPath {
                    product_id: product.id.clone(),
                    spec: spec.clone(),
                    path: expand_template(&spec.path_template, &self.roots)?,
                })
            })
            .collect()
    }
}
