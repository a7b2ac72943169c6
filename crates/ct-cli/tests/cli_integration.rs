//! CLI integration tests
//!
//! Tests the chtc binary using assert_cmd. Every invocation gets an
//! explicit config file and a scrubbed environment, so nothing here
//! reaches a real access point.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SCRUBBED_ENV: [&str; 9] = [
    "CHTC_CONFIG",
    "CHTC_HOST",
    "CHTC_USER",
    "CHTC_PORT",
    "CHTC_TTL",
    "CHTC_TRACKING_URL",
    "WANDB_API_KEY",
    "WANDB_ENTITY",
    "WANDB_PROJECT",
];

fn chtc() -> Command {
    let mut cmd = Command::cargo_bin("chtc")
        .expect("Failed to locate chtc binary - ensure it's built before running tests");
    for var in SCRUBBED_ENV {
        cmd.env_remove(var);
    }
    cmd
}

/// `chtc -c <dir>/config.toml` with `contents` as the config
fn chtc_with_config(dir: &Path, contents: &str) -> Command {
    let path = dir.join("config.toml");
    std::fs::write(&path, contents).unwrap();
    let mut cmd = chtc();
    cmd.arg("-c").arg(path);
    cmd
}

fn write_ledger(dir: &Path) -> PathBuf {
    let path = dir.join("ledger.jsonl");
    let rows = [
        r#"{"job_id":"4410123","run_id":"","project":"mnist","created_at_ms":1700000000000,"remote_dir":"chtc-jobs/mnist"}"#,
        r#"{"job_id":"4410123","run_id":"abc123","project":"mnist","created_at_ms":1700000000500,"remote_dir":"chtc-jobs/mnist"}"#,
        r#"{"job_id":"4410200","run_id":"","project":"cifar","created_at_ms":1700000001000}"#,
    ];
    std::fs::write(&path, rows.join("\n") + "\n").unwrap();
    path
}

#[test]
fn test_cli_help() {
    chtc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("persistent authenticated channel"))
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("ledger"));
}

#[test]
fn test_cli_version() {
    chtc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chtc"));
}

#[test]
fn test_api_key_hidden_from_help() {
    chtc()
        .env("WANDB_API_KEY", "super-secret-key")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("super-secret-key").not());
}

#[test]
fn test_config_path_follows_flag() {
    let dir = TempDir::new().unwrap();
    chtc_with_config(dir.path(), "")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(dir.path().to_string_lossy().as_ref()));
}

#[test]
fn test_config_show_redacts_api_key() {
    let dir = TempDir::new().unwrap();
    let config = r#"
        [endpoint]
        host = "ap2002.chtc.wisc.edu"
        user = "bucky"

        [tracking]
        api_key = "super-secret-key"
        project = "mnist"
    "#;

    chtc_with_config(dir.path(), config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ap2002.chtc.wisc.edu"))
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("super-secret-key").not());
}

#[test]
fn test_env_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    chtc_with_config(dir.path(), "[endpoint]\nhost = \"from-file.example.org\"\n")
        .env("CHTC_HOST", "from-env.example.org")
        .env("CHTC_TTL", "600")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-env.example.org"))
        .stdout(predicate::str::contains("ttl = 600"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    chtc()
        .arg("-c")
        .arg(dir.path().join("absent.toml"))
        .args(["config", "show"])
        .assert()
        .code(1);
}

#[test]
fn test_ledger_list() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(dir.path());

    chtc_with_config(dir.path(), "")
        .arg("--ledger")
        .arg(&ledger)
        .args(["ledger", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4410123"))
        .stdout(predicate::str::contains("abc123"))
        .stdout(predicate::str::contains("4410200"));

    chtc_with_config(dir.path(), "")
        .arg("--ledger")
        .arg(&ledger)
        .args(["ledger", "list", "--project", "cifar"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4410200"))
        .stdout(predicate::str::contains("4410123").not());
}

#[test]
fn test_ledger_show_latest_row() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(dir.path());

    chtc_with_config(dir.path(), "")
        .arg("--ledger")
        .arg(&ledger)
        .args(["ledger", "show", "4410123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("abc123"))
        .stdout(predicate::str::contains("chtc-jobs/mnist"));
}

#[test]
fn test_ledger_show_unknown_job() {
    let dir = TempDir::new().unwrap();
    let ledger = write_ledger(dir.path());

    chtc_with_config(dir.path(), "")
        .arg("--ledger")
        .arg(&ledger)
        .args(["ledger", "show", "999"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not in the ledger"));
}

#[test]
fn test_empty_ledger() {
    let dir = TempDir::new().unwrap();

    chtc_with_config(dir.path(), "")
        .arg("--ledger")
        .arg(dir.path().join("none.jsonl"))
        .args(["ledger", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No ledger entries"));
}

#[test]
fn test_remote_command_without_host() {
    let dir = TempDir::new().unwrap();

    chtc_with_config(dir.path(), "")
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CHTC_HOST"));
}

#[test]
fn test_exec_requires_command() {
    let dir = TempDir::new().unwrap();

    chtc_with_config(dir.path(), "[endpoint]\nhost = \"ap2002.chtc.wisc.edu\"\n")
        .arg("exec")
        .assert()
        .code(2);
}

#[test]
fn test_submit_help() {
    chtc()
        .args(["submit", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--track"))
        .stdout(predicate::str::contains("--project"));
}
