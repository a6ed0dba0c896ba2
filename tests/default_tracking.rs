mod common;

use common::*;
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use std::path::PathBuf;

use ide_state_reset_lib::app_settings::AppSettings;
use ide_state_reset_lib::types::MatchedEntry;
use ide_state_reset_lib::{CleanOptions, RunState};

// Stock settings; only the busy timeout is shortened.
fn stock_fixture() -> Fixture {
    Fixture::with_settings(|s| {
        *s = AppSettings {
            db_busy_timeout_ms: 200,
            ..AppSettings::default()
        }
    })
}

fn jetbrains_state_db(fx: &Fixture) -> PathBuf {
    fx.roots.config.join("JetBrains/IntelliJIdea2024.1/app-internal-state.db")
}

fn populate_augment_state(fx: &Fixture) {
    create_item_db(
        &fx.global_db_path(),
        &[
            ("augment.vscode-augment", "{\"sessionId\": 1}"),
            ("Augment.session", "token"),
            ("workbench.panel.height", "300"),
        ],
    );

    let tagged = fx.add_workspace("ws01", Marker::None);
    write(&tagged.join("augmentcode.augment/index.json"), b"{}");
    write(&tagged.join("augment.json"), b"{\"chat\": true}");
    create_item_db(&tagged.join("state.vscdb"), &[("augment.chat", "[]")]);
    fx.add_workspace("ws02", Marker::None);

    let db = jetbrains_state_db(fx);
    std::fs::create_dir_all(db.parent().unwrap()).unwrap();
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TABLE state (key TEXT, value TEXT);
         INSERT INTO state VALUES ('plugin.augmentcode.enabled', 'true');
         INSERT INTO state VALUES ('ui.theme', 'Darcula');",
    )
    .unwrap();
}

fn state_keys(path: &std::path::Path) -> Vec<String> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT key FROM state ORDER BY key").unwrap();
    let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
    rows.map(|r| r.unwrap()).collect()
}

#[test]
fn stock_settings_find_augment_records_markers_and_jetbrains_rows() {
    let fx = stock_fixture();
    populate_augment_state(&fx);
    let scan = fx.scan();

    let global = scan.findings.iter().find(|f| f.path == fx.global_db_path()).unwrap();
    let mut keys: Vec<&str> = global
        .matched_entries
        .iter()
        .filter_map(|e| match e {
            MatchedEntry::Record { key } => Some(key.as_str()),
            _ => None,
        })
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["Augment.session", "augment.vscode-augment"]);

    let workspaces = scan.findings.iter().find(|f| f.path == fx.workspace_root()).unwrap();
    assert_eq!(
        workspaces.matched_entries,
        vec![MatchedEntry::Workspace {
            name: "ws01".to_string(),
            marker_entries: vec!["augmentcode.augment".to_string(), "augment.json".to_string()],
            record_keys: vec!["augment.chat".to_string()],
        }]
    );

    let jetbrains = scan.findings.iter().find(|f| f.path == jetbrains_state_db(&fx)).unwrap();
    assert_eq!(
        jetbrains.matched_entries,
        vec![MatchedEntry::Cell {
            table: "state".to_string(),
            column: "key".to_string(),
            value: "plugin.augmentcode.enabled".to_string(),
        }]
    );
}

#[test]
fn stock_clean_removes_only_augment_state() {
    let fx = stock_fixture();
    populate_augment_state(&fx);
    let (_, _, report) = fx.clean(CleanOptions::default());
    assert_eq!(report.state, RunState::Completed);

    let global: Vec<String> = item_rows(&fx.global_db_path()).into_keys().collect();
    assert_eq!(global, vec!["workbench.panel.height".to_string()]);

    let ws01 = fx.workspace_root().join("ws01");
    assert!(!ws01.join("augmentcode.augment").exists());
    assert!(!ws01.join("augment.json").exists());
    assert!(ws01.join("workspace.json").is_file());
    let ws_keys: Vec<String> = item_rows(&ws01.join("state.vscdb")).into_keys().collect();
    assert_eq!(ws_keys, vec!["scm.history".to_string(), "workbench.explorer.treeViewState".to_string()]);

    assert_eq!(state_keys(&jetbrains_state_db(&fx)), vec!["ui.theme".to_string()]);
}
