//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("metricloom")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Event-to-metric aggregation pipeline"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("metricloom")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("metricloom"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("metricloom")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_submit_subcommand_exists() {
    Command::cargo_bin("metricloom")
        .unwrap()
        .args(["submit", "--help"])
        .assert()
        .success();
}

#[test]
fn test_dead_letters_subcommand_exists() {
    Command::cargo_bin("metricloom")
        .unwrap()
        .args(["dead-letters", "--help"])
        .assert()
        .success();
}

#[test]
fn test_dead_letters_on_fresh_db() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fresh.db");

    Command::cargo_bin("metricloom")
        .unwrap()
        .args(["dead-letters", "--db", db.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("No dead letters."));
}
