use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    db: PathBuf,
    db_out: PathBuf,
    config: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hosts"), b"127.0.0.1 localhost\n").unwrap();
        fs::write(root.join("etc/motd"), b"welcome\n").unwrap();
        fs::write(root.join("skip"), b"not monitored\n").unwrap();
        let fixture = Self {
            db: dir.path().join("fim.db"),
            db_out: dir.path().join("fim.db.new"),
            config: dir.path().join("fimguard.json"),
            root,
            _dir: dir,
        };
        fixture.write_config(fixture.document(&fixture.db, &fixture.db));
        fixture
    }

    fn document(&self, db_in: &Path, db_out: &Path) -> Value {
        json!({
            "root_prefix": self.root,
            "database_in": { "path": db_in },
            "database_out": { "path": db_out },
            "rules": [
                { "kind": "select", "pattern": "/", "attrs": "p+s+sha256", "types": "f" },
                { "kind": "negate", "pattern": "/skip" }
            ]
        })
    }

    fn write_config(&self, doc: Value) {
        fs::write(&self.config, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("fimguard").unwrap();
        cmd.env_remove("RUST_LOG").arg("--config").arg(&self.config);
        cmd
    }

    fn init(&self) {
        self.cmd().arg("init").assert().success();
    }
}

#[test]
fn init_then_check_is_clean() {
    let fx = Fixture::new();
    fx.cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 entries written"));
    assert!(fx.db.exists());

    fx.cmd()
        .arg("check")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("0 added, 0 removed, 0 changed"));
}

#[test]
fn deleted_file_is_reported_as_removed() {
    let fx = Fixture::new();
    fx.init();
    fs::remove_file(fx.root.join("etc/motd")).unwrap();

    fx.cmd()
        .arg("check")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("removed: /etc/motd"));
}

#[test]
fn added_and_changed_files_combine_exit_bits() {
    let fx = Fixture::new();
    fx.init();
    fs::write(fx.root.join("etc/hosts"), b"10.0.0.1 gateway\n").unwrap();
    fs::write(fx.root.join("etc/new"), b"fresh\n").unwrap();

    fx.cmd()
        .arg("check")
        .assert()
        .code(5)
        .stdout(predicate::str::contains("added: /etc/new"))
        .stdout(predicate::str::contains("changed: /etc/hosts"))
        .stdout(predicate::str::contains("  sha256: "));
}

#[test]
fn json_report_parses() {
    let fx = Fixture::new();
    fx.init();
    fs::remove_file(fx.root.join("etc/hosts")).unwrap();

    let output = fx.cmd().arg("--json").arg("check").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["mode"], "check");
    assert_eq!(doc["summary"]["removed"], 1);
    assert_eq!(doc["records"][0]["path"], "/etc/hosts");
    assert_eq!(doc["records"][0]["verdict"], "removed");
    assert_eq!(doc["exit_code"], 2);
}

#[test]
fn update_writes_new_baseline() {
    let fx = Fixture::new();
    fx.init();
    fx.write_config(fx.document(&fx.db, &fx.db_out));
    fs::write(fx.root.join("etc/motd"), b"maintenance tonight\n").unwrap();

    fx.cmd()
        .arg("update")
        .assert()
        .code(4)
        .stdout(predicate::str::contains("changed: /etc/motd"));
    assert!(fx.db_out.exists());

    // the new database matches the filesystem
    fx.write_config(fx.document(&fx.db_out, &fx.db_out));
    fx.cmd().arg("check").assert().code(0);
}

#[test]
fn compare_identical_databases_is_clean() {
    let fx = Fixture::new();
    fx.init();
    let copy = fx.db.with_extension("copy");
    fs::copy(&fx.db, &copy).unwrap();
    let mut doc = fx.document(&fx.db, &fx.db_out);
    doc["database_new"] = json!({ "path": copy });
    fx.write_config(doc);

    fx.cmd()
        .arg("compare")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("removed:").not())
        .stdout(predicate::str::contains("changed:").not());
}

#[test]
fn update_into_input_database_is_rejected() {
    let fx = Fixture::new();
    fx.init();
    fx.cmd()
        .arg("update")
        .assert()
        .code(15)
        .stderr(predicate::str::contains("fimguard:"));
}

#[test]
fn bad_rule_is_a_configuration_error() {
    let fx = Fixture::new();
    let mut doc = fx.document(&fx.db, &fx.db);
    doc["rules"][0]["attrs"] = json!("p+Nope");
    fx.write_config(doc);

    fx.cmd()
        .arg("config-check")
        .assert()
        .code(17)
        .stderr(predicate::str::contains("rules[0].attrs"));
}

#[test]
fn missing_configuration_file_exits_17() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("fimguard")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("absent.json"))
        .arg("check")
        .assert()
        .code(17);
}

#[test]
fn config_check_reports_rule_count() {
    let fx = Fixture::new();
    fx.cmd()
        .arg("config-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration ok (2 rules)"));
}

#[test]
fn invalid_limit_exits_15() {
    let fx = Fixture::new();
    fx.cmd().args(["--limit", "(", "check"]).assert().code(15);
}

#[test]
fn unknown_subcommand_exits_15() {
    Command::cargo_bin("fimguard")
        .unwrap()
        .arg("rebuild")
        .assert()
        .code(15);
}

#[test]
fn truncated_database_is_an_io_error() {
    let fx = Fixture::new();
    fs::write(&fx.db, "@@db_spec 1 path,attr,perm\n/etc/hosts,2,0644\n").unwrap();
    fx.cmd().arg("check").assert().code(18);
}

#[test]
fn foreign_database_version_exits_19() {
    let fx = Fixture::new();
    fs::write(&fx.db, "@@db_spec 7 path,perm\n@@end_db 0\n").unwrap();
    fx.cmd().arg("check").assert().code(19);
}

#[test]
fn path_check_shows_deciding_rule() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["path-check", "f:/etc/hosts"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("is monitored"))
        .stdout(predicate::str::contains("rules[0]"));

    fx.cmd()
        .args(["path-check", "f:/skip"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("excluded by !/skip"));

    fx.cmd().args(["path-check", "etc/hosts"]).assert().code(15);
}

#[test]
fn path_check_honours_the_limit() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["--limit", "/usr", "path-check", "f:/etc/hosts"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("outside of the limit (/usr)"));

    fx.cmd()
        .args(["--limit", "/etc", "path-check", "f:/etc/hosts"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("is monitored"));
}

#[test]
fn dry_init_writes_nothing() {
    let fx = Fixture::new();
    fx.cmd()
        .arg("dry-init")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 would be captured"));
    assert!(!fx.db.exists());
}

#[test]
fn info_lists_attributes() {
    Command::cargo_bin("fimguard")
        .unwrap()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("sha256"))
        .stdout(predicate::str::contains("Groups:"));
}
