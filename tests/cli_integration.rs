// CLI integration tests for the check/completion flows and exit codes.
use std::process::Command;

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_sproutdb");
    let mut command = Command::new(exe);
    command.env_remove("RUST_LOG");
    command
}

fn parse_json(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    let line = text.lines().next().expect("json line");
    serde_json::from_str(line).expect("valid json")
}

#[test]
fn check_summarizes_seeded_tables() {
    let temp = tempfile::tempdir().expect("tempdir");
    let seed = temp.path().join("seed");
    std::fs::create_dir(&seed).expect("mkdir");
    std::fs::write(seed.join("users.json"), r#"[{"id": 1}, {"id": 2}]"#).expect("write");
    std::fs::write(seed.join("posts.json"), r#"[{"id": 1, "title": "Hello"}]"#).expect("write");
    let schema = temp.path().join("schema.json");
    std::fs::write(&schema, r#"{"users": {"fields": {"id": {"type": "integer"}}}}"#)
        .expect("write");

    let output = cmd()
        .arg("check")
        .arg("--seed")
        .arg(&seed)
        .arg("--schema")
        .arg(&schema)
        .args(["--table", "audit"])
        .output()
        .expect("check");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        parse_json(&output.stdout),
        json!({"tables": [
            {"name": "users", "records": 2, "validated": true},
            {"name": "audit", "records": 0, "validated": false},
            {"name": "posts", "records": 1, "validated": false},
        ]})
    );
}

#[test]
fn check_logs_registration_and_seeding_when_asked() {
    let temp = tempfile::tempdir().expect("tempdir");
    let seed = temp.path().join("seed.json");
    std::fs::write(&seed, r#"{"users": [{"id": 1}]}"#).expect("write");

    let quiet = cmd().arg("check").arg("--seed").arg(&seed).output().expect("check");
    assert!(quiet.status.success());
    assert!(quiet.stderr.is_empty(), "{}", String::from_utf8_lossy(&quiet.stderr));

    let output = cmd()
        .env("RUST_LOG", "debug")
        .arg("check")
        .arg("--seed")
        .arg(&seed)
        .output()
        .expect("check");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("registered table on demand"), "{stderr}");
    assert!(stderr.contains("seeded table"), "{stderr}");
    assert!(stderr.contains("seed data loaded"), "{stderr}");
}

#[test]
fn missing_seed_exits_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .arg("check")
        .arg("--seed")
        .arg(temp.path().join("nope.json"))
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(3));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert!(err["error"]["path"].as_str().is_some());
}

#[test]
fn seed_violating_schema_exits_validation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let seed = temp.path().join("seed.json");
    std::fs::write(&seed, r#"{"users": [{"id": 1}, {"id": "two"}]}"#).expect("write");
    let schema = temp.path().join("schema.json");
    std::fs::write(&schema, r#"{"users": {"fields": {"id": {"type": "integer"}}}}"#)
        .expect("write");

    let output = cmd()
        .arg("check")
        .arg("--seed")
        .arg(&seed)
        .arg("--schema")
        .arg(&schema)
        .output()
        .expect("check");
    assert_eq!(output.status.code(), Some(5));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Validation");
    assert_eq!(err["error"]["issues"][0]["path"], "[1].id");
}

#[test]
fn bad_arguments_exit_usage() {
    let output = cmd().args(["serve", "--bogus"]).output().expect("serve");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "Usage");

    let output = cmd()
        .args(["serve", "--bind", "0.0.0.0:0"])
        .output()
        .expect("serve");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["message"], "non-loopback bind requires explicit opt-in");

    let output = cmd()
        .args(["serve", "--max-body-bytes", "0"])
        .output()
        .expect("serve");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn completion_prints_script() {
    let output = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(output.status.success());
    let script = String::from_utf8_lossy(&output.stdout);
    assert!(script.contains("sproutdb"));
}
