//! Integration tests for the nori CLI
//!
//! These tests run the binary end-to-end against tanks in temporary directories

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const TANK: &str = r#"
entities:
  - kind: CodeSystem
    name: Colors
    id: colors
    rules:
      - type: concept
        code: red
        display: Red
      - type: concept
        code: dark
        ancestors: [red]
  - kind: Instance
    name: Jane
    id: jane
    instanceOf: Patient
    rules:
      - type: assignment
        path: name[+].family
        value: '"Doe"'
"#;

const BROKEN_TANK: &str = r#"
entities:
  - kind: Instance
    name: Jane
    id: jane
    instanceOf: Patient
    rules:
      - type: assignment
        path: active
        value: 'true'
      - type: assignment
        path: name[0].nickname
        value: '"JJ"'
"#;

/// Helper function to create a test CLI command
#[allow(deprecated)]
fn cli() -> Command {
    Command::cargo_bin("nori").unwrap()
}

/// Project directory with a tank and a nori-config.yaml beside it
fn create_test_project(tank: &str) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("tank.yaml"), tank).unwrap();
    fs::write(
        temp_dir.path().join("nori-config.yaml"),
        "canonical: http://example.org/fhir\nfhirVersion: 4.0.1\nversion: 1.0.0\n",
    )
    .unwrap();
    temp_dir
}

#[test]
fn test_help_command() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("build"));
}

#[test]
fn test_version_command() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(VERSION));
}

#[test]
fn test_build_writes_resources() {
    let project = create_test_project(TANK);
    let output = project.path().join("out");

    cli()
        .current_dir(project.path())
        .args(["build", "tank.yaml", "--no-color", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("BUILD RESULTS"))
        .stdout(predicate::str::contains("2 resources generated"));

    let code_system: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("CodeSystem-colors.json")).unwrap())
            .unwrap();
    assert_eq!(code_system["url"], "http://example.org/fhir/CodeSystem/colors");
    assert_eq!(code_system["version"], "1.0.0");
    assert_eq!(code_system["count"], 2);
    assert_eq!(code_system["concept"][0]["concept"][0]["code"], "dark");

    let patient: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("Patient-jane.json")).unwrap())
            .unwrap();
    assert_eq!(
        patient,
        serde_json::json!({
            "resourceType": "Patient",
            "id": "jane",
            "name": [{"family": "Doe"}]
        })
    );
}

#[test]
fn test_build_config_override() {
    let project = create_test_project(TANK);
    let output = project.path().join("out");

    cli()
        .current_dir(project.path())
        .args(["build", "tank.yaml", "-c", "version:2.0.0", "-c", "status:active", "-o"])
        .arg(&output)
        .assert()
        .success();

    let code_system: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("CodeSystem-colors.json")).unwrap())
            .unwrap();
    assert_eq!(code_system["version"], "2.0.0");
    assert_eq!(code_system["status"], "active");
}

#[test]
fn test_build_with_rule_errors_exits_with_failure() {
    let project = create_test_project(BROKEN_TANK);
    let output = project.path().join("out");

    let assert = cli()
        .current_dir(project.path())
        .args(["build", "tank.yaml", "--format", "json", "-o"])
        .arg(&output)
        .assert()
        .code(1);

    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["stats"]["errors"], 1);
    assert_eq!(report["stats"]["instances"], 1);
    assert_eq!(report["diagnostics"][0]["kind"], "unresolvable-path");

    // The resource is still written without the failed rule
    let patient: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("Patient-jane.json")).unwrap())
            .unwrap();
    assert_eq!(patient["active"], true);
    assert!(patient.get("name").is_none());
}

#[test]
fn test_build_keeps_resources_sharing_an_id() {
    let tank = r#"
entities:
  - kind: Instance
    name: First
    id: shared
    instanceOf: Patient
    rules:
      - type: assignment
        path: active
        value: 'true'
  - kind: Instance
    name: Second
    id: shared
    instanceOf: Patient
    rules:
      - type: assignment
        path: active
        value: 'false'
"#;
    let project = create_test_project(tank);
    let output = project.path().join("out");

    let assert = cli()
        .current_dir(project.path())
        .args(["build", "tank.yaml", "--format", "json", "-o"])
        .arg(&output)
        .assert()
        .code(1);

    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["diagnostics"][0]["kind"], "duplicate-identity");
    assert_eq!(report["files"].as_array().unwrap().len(), 2);

    let read = |name: &str| -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(output.join(name)).unwrap()).unwrap()
    };
    assert_eq!(read("Patient-shared.json")["active"], true);
    assert_eq!(read("Patient-shared-2.json")["active"], false);
}

#[test]
fn test_build_without_canonical_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("tank.yaml"), TANK).unwrap();

    cli()
        .current_dir(temp_dir.path())
        .args(["build", "tank.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("canonical is required"));
}

#[test]
fn test_build_canonical_from_override() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("tank.yaml"), TANK).unwrap();

    cli()
        .current_dir(temp_dir.path())
        .args(["build", "tank.yaml", "-c", "canonical:http://acme.org"])
        .assert()
        .success();

    let code_system: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(temp_dir.path().join("fsh-generated/CodeSystem-colors.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(code_system["url"], "http://acme.org/CodeSystem/colors");
}

#[test]
fn test_invalid_override_format() {
    cli()
        .args(["build", "tank.yaml", "-c", "version"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Expected 'key:value'"));
}

#[test]
fn test_missing_tank_fails() {
    let temp_dir = TempDir::new().unwrap();

    cli()
        .current_dir(temp_dir.path())
        .args(["build", "missing.yaml", "-c", "canonical:http://acme.org"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load tank"));
}
