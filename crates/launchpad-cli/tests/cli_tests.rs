// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `launchpad` binary.

use assert_cmd::Command;
use predicates::str::contains;
use std::path::Path;

fn launchpad() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("launchpad").expect("binary `launchpad` should be built")
}

fn write_options(dir: &Path, script: &str, body: &str) -> std::path::PathBuf {
    std::fs::write(dir.join("svc.sh"), script).unwrap();
    let path = dir.join("launchpad.toml");
    let toml = format!(
        "svc = \"svc\"\ncwd = {cwd:?}\ninterpreter = \"sh\"\nscript_ext = \"sh\"\nlog_path = {log:?}\nterm_timeout = 200\n{body}",
        cwd = dir.display().to_string(),
        log = dir.join("e2e.log").display().to_string(),
    );
    std::fs::write(&path, toml).unwrap();
    path
}

// ── Help & version ──────────────────────────────────────────────────

#[test]
fn help_flag_prints_usage() {
    launchpad()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Launchpad"))
        .stdout(contains("check"))
        .stdout(contains("up"));
}

#[test]
fn version_flag_prints_version() {
    launchpad()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

// ── check ───────────────────────────────────────────────────────────

#[test]
fn check_prints_resolved_command() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_options(tmp.path(), "echo hi\n", "term_code = \"SIGTERM\"\n");

    launchpad()
        .env_remove("COVER")
        .args(["check", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("sh svc.sh"))
        .stdout(contains("SIGTERM"))
        .stdout(contains("200ms"));
}

#[test]
fn check_json_is_machine_readable() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_options(tmp.path(), "echo hi\n", "args = [\"--port\", \"3000\"]\n");

    let output = launchpad()
        .env_remove("COVER")
        .args(["check", "--json", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["program"], "sh");
    assert_eq!(v["args"], serde_json::json!(["svc.sh", "--port", "3000"]));
    assert_eq!(v["term_timeout"], 200);
    assert_eq!(v["coverage"], false);
}

#[test]
fn check_with_cover_wraps_the_command() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_options(tmp.path(), "echo hi\n", "cover_svc = \"cover.sh\"\n");

    launchpad()
        .args(["check", "--cover", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("sh cover.sh cover --dir ./coverage/e2e-test --handle-sigint svc.sh"));
}

#[test]
fn check_reports_first_invalid_option() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_options(tmp.path(), "echo hi\n", "ready_notice = 42\n");

    launchpad()
        .args(["check", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("options.ready_notice must be a string"))
        .stderr(contains("valid options should be a table"));
}

#[test]
fn check_missing_file_fails() {
    let tmp = tempfile::tempdir().unwrap();
    launchpad()
        .args(["check", "--config"])
        .arg(tmp.path().join("nope.toml"))
        .assert()
        .failure()
        .stderr(contains("options file not found"));
}

// ── up ──────────────────────────────────────────────────────────────

#[test]
fn up_with_external_target_does_not_launch() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_options(tmp.path(), "echo listening on port\nsleep 30\n", "");

    launchpad()
        .env("SUT", "http://staging.local")
        .args(["up", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("test target: http://staging.local"));
    assert!(!tmp.path().join("e2e.log").exists());
}

#[cfg(unix)]
#[test]
fn up_fails_when_service_dies_during_start() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_options(tmp.path(), "echo 'no config' >&2\nexit 2\n", "");

    launchpad()
        .env_remove("SUT")
        .env_remove("COVER")
        .args(["up", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("service exited before it was ready"));
    let log = std::fs::read_to_string(tmp.path().join("e2e.log")).unwrap();
    assert_eq!(log, "ERR: no config\n");
}
