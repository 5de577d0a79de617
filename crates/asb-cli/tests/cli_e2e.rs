// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end tests for the `asb` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn asb() -> Command {
    Command::cargo_bin("asb").expect("asb binary builds")
}

#[test]
fn check_accepts_the_default_configuration() {
    asb()
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration ok"));
}

#[test]
fn check_rejects_a_broken_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.toml");
    std::fs::write(&path, "[dispatcher]\nworkers = 0\n").unwrap();

    asb()
        .arg("check")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers"));
}

#[test]
fn tick_processes_an_empty_hub() {
    let dir = tempfile::tempdir().unwrap();

    asb()
        .arg("tick")
        .arg("--hub-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("processed 0 request(s)"));
}

#[test]
fn missing_hub_dir_is_a_startup_failure() {
    asb()
        .arg("tick")
        .arg("--hub-dir")
        .arg("/definitely/not/a/directory")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn tick_recovers_orphaned_requests() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("comms/inbox/billing");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(
        inbox.join("req-y.md"),
        "id: req-y\nfrom: o\nto: billing\nscope: billing\ntype: task\npriority: high\nstatus: in-progress\ncreated: 2025-06-10T12:00:00Z\nupdated: 2025-06-10T12:00:00Z\n",
    )
    .unwrap();

    asb()
        .arg("tick")
        .arg("--hub-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("recovered 1 in-progress request(s)"));

    let text = std::fs::read_to_string(inbox.join("req-y.md")).unwrap();
    assert!(text.contains("status: pending"));
}
