//! Behavioural smoke tests for the `baton` binary.

use std::fs;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

fn isolated(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("baton");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("BATON_CONFIG_PATH")
        .env_remove("BATON_STATE_FILE")
        .env_remove("BATON_SNAPSHOT_ID");
    cmd
}

fn workspace() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn help_lists_subcommands() {
    let dir = workspace();
    isolated(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("deploy"))
        .stdout(contains("keepalive"))
        .stdout(contains("status"));
}

#[test]
fn missing_subcommand_prints_usage() {
    let dir = workspace();
    isolated(&dir).assert().failure().stderr(contains("Usage"));
}

#[test]
fn status_without_record_points_at_deploy() {
    let dir = workspace();
    isolated(&dir)
        .arg("status")
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("no handoff record at .sandbox-state.json"))
        .stderr(contains("baton deploy"));
}

#[test]
fn status_prints_recorded_image() {
    let dir = workspace();
    fs::write(
        dir.path().join("handoff.json"),
        r#"{"snapshotId":"snap-42","previousSnapshotId":"snap-41","sandboxId":"sbx-9"}"#,
    )
    .unwrap_or_else(|err| panic!("write record: {err}"));

    isolated(&dir)
        .env("BATON_STATE_FILE", "handoff.json")
        .arg("status")
        .assert()
        .success()
        .stdout(contains("\"snapshotId\": \"snap-42\""))
        .stdout(contains("\"previousSnapshotId\": \"snap-41\""));
}

#[test]
fn status_rejects_corrupt_record() {
    let dir = workspace();
    fs::write(dir.path().join(".sandbox-state.json"), "not json")
        .unwrap_or_else(|err| panic!("write record: {err}"));

    isolated(&dir)
        .arg("status")
        .assert()
        .code(1)
        .stderr(contains("failed to parse handoff record"));
}

#[test]
fn cycle_requires_provider_token() {
    let dir = workspace();
    isolated(&dir)
        .env_remove("VERCEL_TOKEN")
        .args(["cycle", "--no-hold"])
        .assert()
        .code(1)
        .stderr(contains("token"));
}

#[test]
fn deploy_names_missing_credential() {
    let dir = workspace();
    isolated(&dir)
        .env("VERCEL_TOKEN", "tok")
        .env("BATON_DEPLOY_REQUIRED_ENV", "BATON_SMOKE_CREDENTIAL")
        .env_remove("BATON_SMOKE_CREDENTIAL")
        .arg("deploy")
        .assert()
        .code(1)
        .stderr(contains("required credential BATON_SMOKE_CREDENTIAL is not set"));
}
