use fimguard_core::error::EXIT_INVALID_ARGUMENT;
use fimguard_core::{
    ActionController, ActionFlags, Attribute, GuardConfig, GuardError, LocalProbe, RunContext,
    RunMode, Verdict,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn compile(doc: Value) -> RunContext {
    GuardConfig::from_json(&doc.to_string())
        .unwrap()
        .compile(None)
        .unwrap()
}

fn host(root: &Path) {
    fs::create_dir_all(root.join("etc")).unwrap();
    fs::create_dir_all(root.join("var/log")).unwrap();
    fs::write(root.join("etc/app.conf"), b"a=1\n").unwrap();
    fs::write(root.join("var/log/app.log"), b"line one\n").unwrap();
}

fn host_config(root: &Path, db_in: &Path, db_out: &Path, compressed: bool) -> Value {
    json!({
        "root_prefix": root,
        "database_in": { "path": db_in, "compressed": compressed },
        "database_out": { "path": db_out, "compressed": compressed },
        "rules": [
            { "kind": "select", "pattern": "/etc", "attrs": "p+s+m+sha256", "types": "f" },
            { "kind": "select", "pattern": "/var/log", "attrs": "p+S", "types": "f" }
        ],
        "report": { "ignore_changed": "m", "force": "p" }
    })
}

#[test]
fn identical_locations_are_rejected_before_any_io() {
    let ctx = compile(json!({
        "root_prefix": "/no/such/root",
        "database_in": { "path": "/no/such/dir/db" },
        "database_out": { "path": "/no/such/dir/../dir/db" },
        "database_new": { "path": "/no/such/dir/db" }
    }));
    let controller = ActionController::new(&ctx, &LocalProbe);

    for flags in [ActionFlags::INIT | ActionFlags::COMPARE, ActionFlags::DIFF] {
        let err = controller.run(flags).unwrap_err();
        assert!(matches!(err, GuardError::InvalidDatabases(_)), "{:?}", err);
        assert_eq!(err.exit_code(), EXIT_INVALID_ARGUMENT);
    }
}

#[test]
fn report_policy_and_growing_logs() {
    let root = tempdir().unwrap();
    let dbs = tempdir().unwrap();
    host(root.path());
    let db = dbs.path().join("db");
    let ctx = compile(host_config(root.path(), &db, &db, true));
    let controller = ActionController::new(&ctx, &LocalProbe);

    let outcome = controller.run(ActionFlags::INIT).unwrap();
    assert_eq!(outcome.mode, RunMode::Init);
    assert_eq!(outcome.written, Some(2));

    fs::write(root.path().join("etc/app.conf"), b"a=22\n").unwrap();
    fs::write(root.path().join("var/log/app.log"), b"line one\nline two\n").unwrap();

    let outcome = controller.run(ActionFlags::COMPARE).unwrap();
    assert_eq!(outcome.records.len(), 1);
    let record = &outcome.records[0];
    assert_eq!(record.path, "/etc/app.conf");
    assert_eq!(record.verdict, Verdict::Changed);
    let changes: Vec<(Attribute, bool)> = record.changes.iter().map(|c| (c.attr, c.forced)).collect();
    assert_eq!(
        changes,
        vec![
            (Attribute::Size, false),
            (Attribute::Sha256, false),
            (Attribute::Perm, true),
        ]
    );
    assert_eq!(outcome.exit_code(), 4);

    // a log that shrinks is a change
    fs::write(root.path().join("var/log/app.log"), b"x\n").unwrap();
    let outcome = controller.run(ActionFlags::COMPARE).unwrap();
    let paths: Vec<&str> = outcome.records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/etc/app.conf", "/var/log/app.log"]);
}

#[test]
fn update_then_check_is_clean() {
    let root = tempdir().unwrap();
    let dbs = tempdir().unwrap();
    host(root.path());
    let db = dbs.path().join("db");
    let db_new = dbs.path().join("db.new");

    let init = compile(host_config(root.path(), &db, &db, false));
    ActionController::new(&init, &LocalProbe)
        .run(ActionFlags::INIT)
        .unwrap();

    fs::remove_file(root.path().join("var/log/app.log")).unwrap();
    fs::write(root.path().join("etc/extra.conf"), b"b=2\n").unwrap();

    let update = compile(host_config(root.path(), &db, &db_new, false));
    let outcome = ActionController::new(&update, &LocalProbe)
        .run(ActionFlags::INIT | ActionFlags::COMPARE)
        .unwrap();
    assert_eq!(outcome.summary.added, 1);
    assert_eq!(outcome.summary.removed, 1);
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.written, Some(2));

    let check = compile(host_config(root.path(), &db_new, &db_new, false));
    let outcome = ActionController::new(&check, &LocalProbe)
        .run(ActionFlags::COMPARE)
        .unwrap();
    assert!(outcome.summary.is_clean());
    assert!(outcome.degraded.is_empty());
}

#[test]
fn compare_two_databases() {
    let root = tempdir().unwrap();
    let dbs = tempdir().unwrap();
    host(root.path());
    let old = dbs.path().join("old");
    let new = dbs.path().join("new");

    ActionController::new(&compile(host_config(root.path(), &old, &old, false)), &LocalProbe)
        .run(ActionFlags::INIT)
        .unwrap();
    fs::remove_file(root.path().join("etc/app.conf")).unwrap();
    ActionController::new(&compile(host_config(root.path(), &new, &new, false)), &LocalProbe)
        .run(ActionFlags::INIT)
        .unwrap();

    let mut doc = host_config(root.path(), &old, &old, false);
    doc["database_new"] = json!({ "path": new });
    let ctx = compile(doc);
    let outcome = ActionController::new(&ctx, &LocalProbe)
        .run(ActionFlags::DIFF)
        .unwrap();
    assert_eq!(outcome.mode, RunMode::Compare);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].verdict, Verdict::Removed);
    assert!(outcome.scan.is_none());
}
