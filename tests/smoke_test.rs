//! Smoke tests for the testhub CLI.
//!
//! These tests verify basic CLI functionality:
//! - `testhub --version` outputs version info
//! - `testhub --help` outputs help text
//! - commands against a missing database fail with a JSON error

mod common;

use assert_cmd::Command;
use common::TestEnv;
use predicates::prelude::*;

/// Get a Command for the testhub binary.
fn testhub() -> Command {
    Command::new(env!("CARGO_BIN_EXE_testhub"))
}

#[test]
fn test_version_flag() {
    testhub()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testhub"))
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_help_flag() {
    testhub()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("Options:"));
}

#[test]
fn test_run_help_lists_subcommands() {
    testhub()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ingest"))
        .stdout(predicate::str::contains("summary"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn test_invalid_command() {
    testhub()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_init_creates_database() {
    let env = TestEnv::new();
    env.testhub()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\":true"));
    assert!(env.db_path().is_file());

    env.testhub()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\":false"));
}

#[test]
fn test_init_human_readable() {
    let env = TestEnv::new();
    env.testhub()
        .args(["init", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized testhub database"));
}

#[test]
fn test_missing_database_is_reported() {
    let env = TestEnv::new();
    env.testhub()
        .args(["project", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"kind\":\"not_found\""))
        .stderr(predicate::str::contains("testhub init"));
    assert!(!env.db_path().exists());
}
