//! End-to-end runs of the `relay` binary against a temporary home.
//!
//! Every test gets its own `HOME`, so settings, catalog, state, snapshot and
//! status trees all live under `<home>/.relay/`.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const CATALOG: &str = r#"
families:
  - name: layer
    name_template: "{workspace}:{name}"
    channels: true
    folder: layers
    suffix: .json
tasks:
  - type: create_workspace
    family: layer
    name_template: "{workspace}"
    command: echo "workspace $RELAY_TASK_NAME ready"
  - type: create_feature
    family: layer
    when: [{ absent: broken }]
    command: echo "feature $RELAY_TASK_NAME published"
  - type: update_gwc
    family: layer
    when: [{ present: broken }]
    command: echo "cache refused" >&2; exit 1
"#;

const ROADS: &str = r#"{"workspace":"ws","name":"roads"}"#;

fn relay_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("relay"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    for (key, _) in std::env::vars() {
        if key.starts_with("RELAY_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

fn relay_dir(home: &TempDir) -> PathBuf {
    home.path().join(".relay")
}

fn setup(home: &TempDir) {
    let base = relay_dir(home);
    fs::create_dir_all(&base).expect("create relay dir");
    fs::write(base.join("catalog.yaml"), CATALOG).expect("write catalog");
}

fn write_state(home: &TempDir, file: &str, content: &str) {
    let path = relay_dir(home).join("state").join(file);
    fs::create_dir_all(path.parent().unwrap()).expect("create state dir");
    fs::write(path, content).expect("write state file");
}

#[test]
fn sync_runs_catalog_tasks_and_records_status() {
    let home = TempDir::new().expect("home");
    setup(&home);
    write_state(&home, "kmi/layers/roads.json", ROADS);

    relay_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("1 changed file(s)"));

    let status_file = relay_dir(&home).join("status/kmi/layers/roads.json");
    let status = fs::read_to_string(&status_file).expect("status file");
    assert!(status.contains("feature ws:roads published"), "{status}");
    assert!(relay_dir(&home).join("snapshot/kmi/layers/roads.json").exists());
    assert!(relay_dir(&home).join("status/.pull").exists());

    // The snapshot caught up, so a second sync has nothing to do.
    relay_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("nothing to synchronize"));
}

#[test]
fn failed_job_exits_non_zero_and_keeps_the_changeset() {
    let home = TempDir::new().expect("home");
    setup(&home);
    write_state(
        &home,
        "kmi/layers/roads.json",
        r#"{"workspace":"ws","name":"roads","broken":true}"#,
    );

    relay_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stdout(contains("kmi/layers/roads.json"))
        .stderr(contains("processed failed"));

    assert!(!relay_dir(&home).join("snapshot/kmi/layers/roads.json").exists());

    relay_cmd(home.path())
        .args(["status", "--failed"])
        .assert()
        .success()
        .stdout(contains("update_gwc: "))
        .stdout(contains("cache refused"));

    relay_cmd(home.path())
        .args(["status", "kmi/layers/roads.json"])
        .assert()
        .success()
        .stdout(contains("update_gwc"));
}

#[test]
fn job_report_follows_the_catalog_task_order() {
    let home = TempDir::new().expect("home");
    let base = relay_dir(&home);
    fs::create_dir_all(&base).expect("create relay dir");
    let catalog = format!("order: [update_gwc, create_feature, create_workspace]\n{CATALOG}");
    fs::write(base.join("catalog.yaml"), catalog).expect("write catalog");
    write_state(&home, "kmi/layers/roads.json", ROADS);
    relay_cmd(home.path()).arg("sync").assert().success();

    let output = relay_cmd(home.path())
        .args(["status", "kmi/layers/roads.json"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let report = String::from_utf8_lossy(&output.stdout);
    let feature = report.find(": create_feature").expect("create_feature in report");
    let workspace = report
        .find(": create_workspace")
        .expect("create_workspace in report");
    assert!(feature < workspace, "{report}");
}

#[test]
fn plan_lists_tasks_without_running_them() {
    let home = TempDir::new().expect("home");
    setup(&home);
    write_state(&home, "kmi/layers/roads.json", ROADS);
    write_state(&home, "kmi/layers/rivers.json", r#"{"workspace":"ws","name":"rivers"}"#);

    relay_cmd(home.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(contains("A kmi/layers/roads.json  Ready to synchronize"))
        .stdout(contains("create_workspace ws [shared]"))
        .stdout(contains("create_feature ws:roads"));

    assert!(!relay_dir(&home).join("status/kmi/layers/roads.json").exists());
}

#[test]
fn status_json_reports_every_job() {
    let home = TempDir::new().expect("home");
    setup(&home);
    write_state(&home, "kmi/layers/roads.json", ROADS);
    relay_cmd(home.path()).arg("sync").assert().success();

    let output = relay_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["summary"]["jobs"], 1);
    assert_eq!(report["summary"]["failed"], 0);
    assert_eq!(report["jobs"][0]["file"], "kmi/layers/roads.json");
}

#[test]
fn diff_shows_pending_content() {
    let home = TempDir::new().expect("home");
    setup(&home);
    write_state(&home, "kmi/layers/roads.json", ROADS);

    relay_cmd(home.path())
        .arg("diff")
        .assert()
        .success()
        .stdout(contains("+++ b/kmi/layers/roads.json"))
        .stdout(contains(r#"+{"workspace":"ws","name":"roads"}"#));

    relay_cmd(home.path())
        .args(["diff", "other/"])
        .assert()
        .success()
        .stdout(contains("No pending changes."));
}

#[test]
fn poll_once_does_not_fail_on_job_errors() {
    let home = TempDir::new().expect("home");
    setup(&home);
    write_state(
        &home,
        "kmi/layers/roads.json",
        r#"{"workspace":"ws","name":"roads","broken":true}"#,
    );

    relay_cmd(home.path())
        .args(["poll", "--once"])
        .assert()
        .success()
        .stdout(contains("failed"));
}

#[test]
fn missing_catalog_is_reported() {
    let home = TempDir::new().expect("home");

    relay_cmd(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(contains("failed to load catalog").and(contains("catalog.yaml")));
}
