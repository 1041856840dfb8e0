//! Smoke tests for the tasktide CLI.
//!
//! These tests verify basic CLI functionality:
//! - `tt --version` outputs version info
//! - `tt --help` outputs help text
//! - a subcommand is required

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a Command for the tt binary.
fn tt() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tt"))
}

#[test]
fn test_version_flag() {
    tt().arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tt"))
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_long_version_includes_build_info() {
    tt().arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
    tt().arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("commit:"));
}

#[test]
fn test_help_flag() {
    tt().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("Options:"));
}

#[test]
fn test_subcommand_required() {
    tt().assert().failure();
}

#[test]
fn test_task_help() {
    tt().args(["task", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("toggle"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_task_list_help_shows_filters() {
    tt().args(["task", "list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--status"))
        .stdout(predicate::str::contains("--assigned-to"))
        .stdout(predicate::str::contains("--sort"));
}
