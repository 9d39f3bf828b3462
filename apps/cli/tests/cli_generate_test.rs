//! Integration tests for the `pagesmith generate` command.
//!
//! These run without a model server: the base URL points at a closed local
//! port so every attempt fails fast with a request error.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const UNREACHABLE: &str = "http://127.0.0.1:9";

#[test]
fn test_generate_requires_project() {
    let mut cmd = Command::cargo_bin("pagesmith").unwrap();
    cmd.arg("generate")
        .arg("Build a bakery site")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--project"));
}

#[test]
fn test_generate_rejects_empty_request() {
    let temp_dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("pagesmith").unwrap();
    cmd.arg("generate")
        .arg("   ")
        .arg("--project")
        .arg(temp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Request must not be empty"));
}

#[test]
fn test_generate_unreachable_server_fails_with_json_events() {
    let temp_dir = TempDir::new().unwrap();
    let project = temp_dir.path().join("bakery");

    let mut cmd = Command::cargo_bin("pagesmith").unwrap();
    cmd.env_remove("PAGESMITH_BASE_URL")
        .env_remove("PAGESMITH_MODEL")
        .env_remove("PAGESMITH_DEADLINE_SECS")
        .arg("generate")
        .arg("Build a website for my bakery")
        .arg("--project")
        .arg(&project)
        .arg("--base-url")
        .arg(UNREACHABLE)
        .arg("--deadline-secs")
        .arg("30")
        .arg("--json")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"phase\":\"start\""))
        .stdout(predicate::str::contains("\"phase\":\"failed\""))
        .stdout(predicate::str::contains("\"phase\":\"complete\"").not());

    assert!(!project.exists());
}

#[test]
fn test_generate_invalid_config_reports_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("pagesmith.toml");
    fs::write(&config, "[engine]\nmax_attempts = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("pagesmith").unwrap();
    cmd.arg("generate")
        .arg("Build a bakery site")
        .arg("--project")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
