// tests/common/mod.rs
// Shared fixture: a fake machine (home/config/data roots) inside a temp dir,
// an isolated state directory and a controllable process probe.
#![allow(dead_code)]

use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use ide_state_reset_lib::app_settings::AppSettings;
use ide_state_reset_lib::types::ProductTarget;
use ide_state_reset_lib::{
    CleanOptions, Context, Engine, MutationPlan, Os, ProcessProbe, Roots, RunReport, ScanReport,
};

pub const EXTENSION: &str = "acme.helper";

pub const MACHINE_ID: &str = "9f2c4b7a1e3d5f60718293a4b5c6d7e8f9012a3b4c5d6e7f8091a2b3c4d5e6f7";
pub const DEV_DEVICE_ID: &str = "3b6f0c2e-8d41-4a5b-9c7e-1f2a3b4c5d6e";
pub const MAC_MACHINE_ID: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9";
pub const SQM_ID: &str = "{7C1E5A2B-3D4F-4E60-8A71-92B3C4D5E6F7}";
pub const FLAT_MACHINE_ID: &str = "5d9e7a1c-2b3f-4c8d-9e0a-1b2c3d4e5f60";

pub fn storage_json() -> String {
    format!(
        "{{\n    \"telemetry.machineId\": \"{MACHINE_ID}\",\n    \"telemetry.devDeviceId\": \"{DEV_DEVICE_ID}\",\n    \"telemetry.macMachineId\": \"{MAC_MACHINE_ID}\",\n    \"telemetry.sqmId\": \"{SQM_ID}\",\n    \"workbench.colorTheme\": \"Default Dark+\",\n    \"window.zoomLevel\": 1\n}}\n"
    )
}

pub const GLOBAL_ROWS: &[(&str, &str)] = &[
    ("telemetry.firstSessionDate", "Mon, 01 Jan 2024 10:00:00 GMT"),
    ("telemetry.lastSessionDate", "Tue, 02 Jan 2024 10:00:00 GMT"),
    ("storage.serviceMachineId", "c0ffee00-0000-4000-8000-000000000001"),
    ("acme.helper.authState", "{\"signedIn\":true}"),
    ("workbench.panel.height", "300"),
    ("terminal.history", "[]"),
    ("telemetryConsent", "granted"),
];

pub const UNTRACKED_GLOBAL_KEYS: &[&str] = &["telemetryConsent", "terminal.history", "workbench.panel.height"];

/// Process probe whose answer the test controls.
#[derive(Debug, Default)]
pub struct StubProbe {
    running: Mutex<Option<(String, String)>>,
}

impl StubProbe {
    pub fn set_running(&self, product_id: &str, process: &str) {
        *self.running.lock().unwrap() = Some((product_id.to_string(), process.to_string()));
    }

    pub fn clear(&self) {
        *self.running.lock().unwrap() = None;
    }
}

impl ProcessProbe for StubProbe {
    fn running_process(&self, product: &ProductTarget) -> Option<String> {
        match &*self.running.lock().unwrap() {
            Some((id, process)) if *id == product.id => Some(process.clone()),
            _ => None,
        }
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub roots: Roots,
    pub probe: Arc<StubProbe>,
    pub engine: Engine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    None,
    Dir,
    JsonFile,
    RecordOnly,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::with_settings(|_| {})
    }

    pub fn with_settings(tweak: impl FnOnce(&mut AppSettings)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let roots = Roots::under(&dir.path().join("machine"));
        for root in [&roots.home, &roots.config, &roots.data] {
            fs::create_dir_all(root).unwrap();
        }
        let probe = Arc::new(StubProbe::default());
        let mut settings = AppSettings {
            tracked_extensions: vec![EXTENSION.to_string()],
            db_busy_timeout_ms: 200,
            ..AppSettings::default()
        };
        tweak(&mut settings);
        let ctx = Context::for_roots(Os::Linux, roots.clone(), &dir.path().join("state"), probe.clone())
            .unwrap()
            .with_settings(settings);
        Fixture {
            engine: Engine::new(ctx),
            dir,
            roots,
            probe,
        }
    }

    /// Rebuilds the engine over the same roots and state (a "second process").
    pub fn reopen(&self) -> Engine {
        let settings = self.engine.context().settings.clone();
        let ctx = Context::for_roots(Os::Linux, self.roots.clone(), &self.state_dir(), self.probe.clone())
            .unwrap()
            .with_settings(settings);
        Engine::new(ctx)
    }

    pub fn machine_root(&self) -> PathBuf {
        self.dir.path().join("machine")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.engine.context().backup_root.clone()
    }

    pub fn code_dir(&self) -> PathBuf {
        self.roots.config.join("Code")
    }

    pub fn storage_json_path(&self) -> PathBuf {
        self.code_dir().join("User/globalStorage/storage.json")
    }

    pub fn machineid_path(&self) -> PathBuf {
        self.code_dir().join("machineid")
    }

    pub fn global_db_path(&self) -> PathBuf {
        self.code_dir().join("User/globalStorage/state.vscdb")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.code_dir().join("User/workspaceStorage")
    }

    pub fn jetbrains_device_id(&self) -> PathBuf {
        self.roots.config.join("JetBrains/PermanentDeviceId")
    }

    /// storage.json, machineid and the global database, plus an unrelated
    /// settings file that must never change.
    pub fn populate_vscode(&self) {
        write(&self.storage_json_path(), storage_json().as_bytes());
        write(&self.machineid_path(), format!("{FLAT_MACHINE_ID}\n").as_bytes());
        create_item_db(&self.global_db_path(), GLOBAL_ROWS);
        write(
            &self.code_dir().join("User/settings.json"),
            b"{\n  \"editor.fontSize\": 14\n}\n",
        );
    }

    pub fn populate_jetbrains(&self) {
        write(&self.jetbrains_device_id(), b"a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d");
        write(&self.roots.config.join("JetBrains/PermanentUserId"), b"f0e1d2c3-b4a5-4968-8776-655443322110\n");
    }

    /// One workspace folder with ordinary content and, depending on `marker`,
    /// entries belonging to the tracked extension.
    pub fn add_workspace(&self, name: &str, marker: Marker) -> PathBuf {
        let ws = self.workspace_root().join(name);
        write(&ws.join("workspace.json"), format!("{{\"folder\": \"file:///src/{name}\"}}").as_bytes());
        write(&ws.join("vscode.git/cache.bin"), name.as_bytes());
        let mut rows = vec![("workbench.explorer.treeViewState", "{}"), ("scm.history", "[]")];
        match marker {
            Marker::None => {}
            Marker::Dir => {
                write(&ws.join(EXTENSION).join("index.json"), b"{\"chunks\": 12}");
                write(&ws.join(EXTENSION).join("blobs/0001"), b"blob");
            }
            Marker::JsonFile => write(&ws.join(format!("{EXTENSION}.json")), b"{\"session\": \"x\"}"),
            Marker::RecordOnly => {}
        }
        if marker != Marker::None {
            rows.push(("acme.helper.workspaceSession", "{\"id\": 7}"));
        }
        create_item_db(&ws.join("state.vscdb"), &rows);
        ws
    }

    pub fn scan(&self) -> ScanReport {
        self.engine.scan(&[]).unwrap()
    }

    pub fn clean(&self, options: CleanOptions) -> (ScanReport, MutationPlan, RunReport) {
        let scan = self.scan();
        let plan = self.engine.plan(&scan, options).unwrap();
        let report = self.engine.run(&plan).unwrap();
        (scan, plan, report)
    }

    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        snapshot_files(&self.machine_root())
    }
}

pub fn write(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

pub fn create_item_db(path: &Path, rows: &[(&str, &str)]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
         CREATE TABLE IF NOT EXISTS Meta (name TEXT, value TEXT);
         INSERT INTO Meta VALUES ('schema', '1');",
    )
    .unwrap();
    for (key, value) in rows {
        conn.execute("INSERT INTO ItemTable (key, value) VALUES (?1, ?2)", params![key, value])
            .unwrap();
    }
}

pub fn item_rows(path: &Path) -> BTreeMap<String, String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT key, CAST(value AS TEXT) FROM ItemTable").unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .unwrap();
    rows.map(|r| r.unwrap()).collect()
}

/// Every file under `root` by relative path. Directories are recorded with an
/// empty body so removed folders show up too.
pub fn snapshot_files(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    collect(root, root, &mut out);
    out
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries {
        let path = entry.unwrap().path();
        let rel = path.strip_prefix(root).unwrap().to_path_buf();
        if path.is_dir() {
            out.insert(rel.join(""), Vec::new());
            collect(root, &path, out);
        } else {
            out.insert(rel, fs::read(&path).unwrap());
        }
    }
}

/// Relative paths whose content or existence differs between two snapshots.
pub fn changed_paths(before: &BTreeMap<PathBuf, Vec<u8>>, after: &BTreeMap<PathBuf, Vec<u8>>) -> Vec<PathBuf> {
    let mut keys: Vec<&PathBuf> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}
