//! Integration tests for the `sift` binary.
//!
//! Each test writes a manifest into a temporary directory and runs the
//! built executable against it.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const APP: &str = r#"
entry_points = ["App::Main"]

[[types]]
name = "App"
[[types.methods]]
name = "Main"
kind = "static"
body = [
    { op = "get_method", type = "Order", name = "Validate", intent = "invoke" },
    { op = "typeof", type = "Billing" },
    { op = "call", method = "Billing::Charge" },
]

[[types]]
name = "Order"
[[types.methods]]
name = "Validate"
returns = "bool"

[[types]]
name = "Billing"
[[types.methods]]
name = "Charge"
kind = "static"
"#;

fn write_manifest(dir: &Path) -> PathBuf {
    let path = dir.join("app.toml");
    std::fs::write(&path, APP).unwrap();
    path
}

fn sift(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sift"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("SIFT_LOG")
        .output()
        .expect("failed to run sift")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ────────────────────────────────────────────────────────────────────────────
// analyze
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_analyze_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let output = sift(&["analyze", manifest.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let members = report["plan"]["members"].as_array().unwrap();
    let validate = members
        .iter()
        .find(|m| m["name"] == "Order::Validate()")
        .expect("Validate retained");
    assert_eq!(validate["invoke_thunk"], true);
    // Called, never looked up
    assert!(members.iter().all(|m| m["name"] != "Billing::Charge()"));

    let lookup = report["lookup"].as_array().unwrap();
    let entry = lookup
        .iter()
        .find(|e| e["owner"] == "Order" && e["name"] == "Validate")
        .unwrap();
    assert_eq!(entry["entry"]["entry"], "thunk");
    assert_eq!(report["digest"].as_str().unwrap().len(), 64);
}

#[test]
fn test_analyze_writes_report_file() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let report_path = dir.path().join("plan.json");
    let output = sift(&[
        "analyze",
        manifest.to_str().unwrap(),
        "--output",
        report_path.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Retention plan"));

    let text = std::fs::read_to_string(&report_path).unwrap();
    let report: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(report["plan"]["types"].is_array());
}

#[test]
fn test_config_file_next_to_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    std::fs::write(
        dir.path().join("sift.toml"),
        "[retention]\nmode = \"from-usage\"\nworkers = 2\n",
    )
    .unwrap();

    let output = sift(&["analyze", manifest.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["stats"]["workers"], 2);
    // Reached by code, so reflectable in this mode
    let members = report["plan"]["members"].as_array().unwrap();
    assert!(members.iter().any(|m| m["name"] == "Billing::Charge()"));
}

#[test]
fn test_missing_manifest_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = sift(&["analyze", dir.path().join("nope.toml").to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load manifest"));
}

// ────────────────────────────────────────────────────────────────────────────
// query
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_query_type_and_members() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let path = manifest.to_str().unwrap();

    let output = sift(&["query", path, "Order::Validate"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("THUNK"));

    let output = sift(&["query", path, "Billing"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("browsable  true"));

    let output = sift(&["query", path, "Billing::Charge"]);
    assert!(!output.status.success());
}

// ────────────────────────────────────────────────────────────────────────────
// digest
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_digest_stable_across_workers() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let path = manifest.to_str().unwrap();

    let one = sift(&["digest", path, "-j", "1"]);
    let four = sift(&["digest", path, "-j", "4"]);
    assert!(one.status.success() && four.status.success());
    let digest = stdout(&one).trim().to_string();
    assert_eq!(digest, stdout(&four).trim());

    assert!(sift(&["digest", path, "--expect", &digest]).status.success());
    assert!(!sift(&["digest", path, "--expect", "00"]).status.success());
}
