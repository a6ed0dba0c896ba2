mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::fs;

use ide_state_reset_lib::backup::{load_set, MANIFEST_FILE};
use ide_state_reset_lib::types::{BackupOrigin, EntryKind};
use ide_state_reset_lib::{CleanOptions, ExitStatus, ResetError, RunState};

fn fixture() -> Fixture {
    let fx = Fixture::new();
    fx.populate_vscode();
    fx.add_workspace("ws-marked", Marker::Dir);
    fx.add_workspace("ws-plain", Marker::None);
    fx
}

#[test]
fn restore_brings_back_the_pre_run_bytes() {
    let fx = fixture();
    let before = fx.snapshot();
    let (_, _, report) = fx.clean(CleanOptions::default());
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.backup_sets.len(), 1);
    assert_ne!(fx.snapshot(), before);

    let restored = fx.engine.restore(&report.backup_sets[0]).unwrap();
    assert!(restored.is_success(), "{:?}", restored.failures);
    assert_eq!(restored.exit_status(), ExitStatus::Success);
    assert!(restored.safety_backup.is_some());
    assert_eq!(fx.snapshot(), before);

    // The ledger forgets restored artifacts, so the old ids are tracked again.
    let scan = fx.scan();
    let storage = scan.findings.iter().find(|f| f.path == fx.storage_json_path()).unwrap();
    assert_eq!(storage.matched_entries.len(), 4);
}

#[test]
fn backup_set_is_self_contained() {
    let fx = fixture();
    let (_, _, report) = fx.clean(CleanOptions::default());
    let set = load_set(fx.engine.context(), &report.backup_sets[0]).unwrap();
    let set_dir = fx.backup_root().join(&set.id);

    assert!(set_dir.join(MANIFEST_FILE).is_file());
    assert_eq!(set.product_id, "vscode");
    assert_eq!(set.origin, BackupOrigin::Run);
    assert!(set.id.ends_with("_vscode"));

    let originals: Vec<_> = set.entries.iter().map(|e| e.original_path.clone()).collect();
    assert!(originals.contains(&fx.storage_json_path()));
    assert!(originals.contains(&fx.global_db_path()));
    assert!(originals.contains(&fx.workspace_root().join("ws-marked")));
    assert!(!originals.contains(&fx.workspace_root().join("ws-plain")));

    for entry in &set.entries {
        let copy = set_dir.join(&entry.backup_path);
        assert!(copy.exists(), "{} missing", copy.display());
        match entry.kind {
            EntryKind::File => assert_eq!(ide_state_reset_lib::digest::file_sha256(&copy).unwrap(), entry.checksum),
            EntryKind::Tree => assert_eq!(ide_state_reset_lib::digest::tree_sha256(&copy).unwrap(), entry.checksum),
        }
    }
}

#[test]
fn listing_shows_run_and_safety_sets() {
    let fx = fixture();
    let (_, _, report) = fx.clean(CleanOptions::default());
    let restored = fx.engine.restore(&report.backup_sets[0]).unwrap();

    let sets = fx.engine.list_backups().unwrap();
    assert_eq!(sets.len(), 2);
    // Newest first: the safety snapshot was taken after the run.
    assert_eq!(Some(&sets[0].id), restored.safety_backup.as_ref());
    assert_eq!(sets[0].origin, BackupOrigin::PreRestore);
    assert_eq!(sets[1].origin, BackupOrigin::Run);
    assert!(sets.iter().all(|s| s.entry_count > 0 && s.total_bytes > 0));
}

#[test]
fn safety_backup_undoes_a_restore() {
    let fx = fixture();
    let (_, _, report) = fx.clean(CleanOptions::default());
    let after_run = fx.snapshot();

    let restored = fx.engine.restore(&report.backup_sets[0]).unwrap();
    let safety = restored.safety_backup.unwrap();
    let undo = fx.engine.restore_without_safety_backup(&safety).unwrap();

    assert!(undo.is_success());
    assert_eq!(undo.safety_backup, None);
    assert_eq!(fx.snapshot(), after_run);
}

#[test]
fn unknown_set_is_reported() {
    let fx = fixture();
    assert!(matches!(fx.engine.restore("19990101_000000_000000_vscode"), Err(ResetError::BackupSetNotFound(_))));
    assert!(matches!(fx.engine.restore("../state"), Err(ResetError::BackupSetNotFound(_))));
}

#[test]
fn tampered_copy_fails_verification_per_entry() {
    let fx = fixture();
    let (_, _, report) = fx.clean(CleanOptions::default());
    let set = load_set(fx.engine.context(), &report.backup_sets[0]).unwrap();
    let entry = set.entries.iter().find(|e| e.original_path == fx.machineid_path()).unwrap();
    fs::write(fx.backup_root().join(&set.id).join(&entry.backup_path), b"tampered").unwrap();

    let restored = fx.engine.restore_without_safety_backup(&set.id).unwrap();
    assert_eq!(restored.failures.len(), 1);
    assert_eq!(restored.failures[0].path, fx.machineid_path());
    assert_eq!(restored.failures[0].error.kind, "RestoreVerificationError");
    assert_eq!(restored.exit_status(), ExitStatus::FatalRestoreFailure);
    // The other entries were still restored.
    assert_eq!(fs::read_to_string(fx.storage_json_path()).unwrap(), storage_json());
}

#[test]
fn old_sets_beyond_the_limit_are_pruned() {
    let fx = Fixture::with_settings(|s| s.max_backups = 1);
    fx.populate_vscode();
    let (_, _, first) = fx.clean(CleanOptions::default());
    assert_eq!(first.state, RunState::Completed);

    // New tracked state appears; the next run backs up again.
    create_item_db(&fx.global_db_path(), &[("telemetry.currentSessionDate", "today")]);
    let (_, _, second) = fx.clean(CleanOptions::default());
    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.pruned_backups, first.backup_sets);

    let ids: Vec<String> = fx.engine.list_backups().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, second.backup_sets);
}

#[test]
fn retention_failure_leaves_the_run_completed_with_a_warning() {
    let fx = fixture();
    let scan = fx.scan();
    let plan = fx.engine.plan(&scan, CleanOptions::default()).unwrap();
    let total = plan.steps.len();
    let backups = fx.backup_root();
    let parked = fx.dir.path().join("parked-backups");

    // The backup root stops being a directory just before retention runs.
    let report = fx
        .engine
        .run_with_progress(&plan, |event| {
            if event.index + 1 == total {
                fs::rename(&backups, &parked).unwrap();
                fs::write(&backups, b"not a directory").unwrap();
            }
        })
        .unwrap();
    fs::remove_file(&backups).unwrap();
    fs::rename(&parked, &backups).unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.exit_status(), ExitStatus::Success);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.pruned_backups.is_empty());
    let ids: Vec<String> = fx.engine.list_backups().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, report.backup_sets);
}

#[test]
fn restore_is_refused_while_the_product_runs() {
    let fx = fixture();
    let (_, _, report) = fx.clean(CleanOptions::default());
    let after = fx.snapshot();

    fx.probe.set_running("vscode", "code");
    let err = fx.engine.restore(&report.backup_sets[0]).unwrap_err();
    assert!(matches!(err, ResetError::TargetProcessRunning { .. }), "{err:?}");
    assert_eq!(fx.snapshot(), after);
    assert_eq!(fx.engine.list_backups().unwrap().len(), 1, "no safety set for a refused restore");

    fx.probe.clear();
    assert!(fx.engine.restore(&report.backup_sets[0]).unwrap().is_success());
}
