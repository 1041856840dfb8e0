//! Integration tests for the task commands and the in-memory demo.
//!
//! No server runs during tests: the demo exercises the full flow in-process,
//! and the remote commands are checked for clean failures.

mod common;

use common::{TestEnv, UNREACHABLE_URL};
use predicates::prelude::*;

fn fast_tick() -> TestEnv {
    TestEnv::with_config("tick-interval-ms 100\n")
}

#[test]
fn test_demo_json() {
    let env = fast_tick();

    let output = env.tt().arg("demo").output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let notices: Vec<&str> = report["notices"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n.as_str())
        .collect();
    assert!(notices.iter().any(|n| n.contains("Timer started")));
    assert!(notices.iter().any(|n| n.contains("Timer stopped")));
    assert_eq!(report["final_tasks"].as_array().unwrap().len(), 5);
}

#[test]
fn test_demo_human() {
    let env = fast_tick();

    env.tt()
        .args(["demo", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. load: 4 tasks in the live table"))
        .stdout(predicate::str::contains("Remote task"));
}

#[test]
fn test_task_list_unreachable_server() {
    let env = TestEnv::new();

    env.tt()
        .args(["--url", UNREACHABLE_URL, "task", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to fetch tasks"));
}

#[test]
fn test_task_show_unreachable_server_human() {
    let env = TestEnv::new();

    env.tt()
        .args(["--url", UNREACHABLE_URL, "task", "show", "t_api", "-H"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_identity_without_password_rejected() {
    let env = TestEnv::new();

    env.tt()
        .args(["--url", UNREACHABLE_URL, "--identity", "ada", "task", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be given together"));
}

#[test]
fn test_invalid_sort_key_rejected() {
    let env = TestEnv::new();

    env.tt()
        .args(["task", "list", "--sort", ":desc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid sort key"));
}

#[test]
fn test_task_update_requires_a_field() {
    let env = TestEnv::new();

    env.tt()
        .args(["--url", UNREACHABLE_URL, "task", "update", "t_ui", "-H"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing to update"));
}

#[test]
fn test_task_update_unreachable_server() {
    let env = TestEnv::new();

    env.tt()
        .args(["--url", UNREACHABLE_URL, "task", "update", "t_ui", "--assign-to", "Ada"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load users"));
}
