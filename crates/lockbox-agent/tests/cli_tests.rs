//! Integration tests for the `lockbox-agent` binary.
//!
//! The agent runs as a subprocess against an API URL nobody listens on, so
//! every fetch fails fast and the commands fall back to stored state.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use lockbox_core::model::{FeatureFlag, ServerConfigData, ServerConfigResponse, ThirdPartyServer};
use lockbox_core::state::{ConfigStateStore, StorageStateService};
use lockbox_storage::FileBackend;

const UNREACHABLE: &str = "http://127.0.0.1:19999";

fn agent_bin() -> &'static str {
    let path = env!("CARGO_BIN_EXE_lockbox-agent");
    assert!(Path::new(path).exists(), "lockbox-agent binary not found at {path}");
    path
}

/// Run the agent with `args` and return (`exit_code`, stdout, stderr).
fn run(args: &[&str], extra_env: &[(&str, &str)]) -> (i32, String, String) {
    let mut command = Command::new(agent_bin());
    command
        .args(args)
        .env("LOCKBOX_API_URL", UNREACHABLE)
        .env("LOCKBOX_STORAGE", "memory")
        .env("LOCKBOX_HTTP_TIMEOUT", "2")
        .env("LOCKBOX_LOG_LEVEL", "warn")
        .env_remove("LOCKBOX_BASE_URL")
        .env_remove("RUST_LOG");
    for (key, value) in extra_env {
        command.env(key, value);
    }
    let output = command.output().expect("failed to execute lockbox-agent");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

/// A record as the agent would have persisted it.
fn sample_config() -> ServerConfigData {
    ServerConfigData::from(ServerConfigResponse {
        version: "2024.2.0".to_owned(),
        git_hash: "stored-hash".to_owned(),
        server: Some(ThirdPartyServer {
            name: "selfhost".to_owned(),
            url: "https://vault.example.com".to_owned(),
        }),
        environment: None,
        feature_states: HashMap::from([
            ("autofill-v2".to_owned(), serde_json::json!(true)),
            ("rollout".to_owned(), serde_json::json!("beta")),
        ]),
    })
}

async fn write_state(path: &Path) {
    let state = StorageStateService::new(Arc::new(FileBackend::new(path)));
    state.set_server_config(&sample_config()).await.unwrap();
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn version_flag() {
    let (code, stdout, _) = run(&["--version"], &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("lockbox-agent"), "unexpected version output: {stdout}");
}

#[test]
fn help_lists_commands_and_variables() {
    let (code, stdout, _) = run(&["--help"], &[]);
    assert_eq!(code, 0);
    for needle in ["watch", "show", "flag", "LOCKBOX_API_URL", "LOCKBOX_REFRESH_INTERVAL"] {
        assert!(stdout.contains(needle), "help should mention {needle}: {stdout}");
    }
}

#[test]
fn rejects_unknown_auth_status() {
    let (code, _, stderr) = run(&["--auth-status", "sleeping", "show"], &[]);
    assert_eq!(code, 2);
    assert!(stderr.contains("unknown auth status"), "stderr: {stderr}");
}

// ── Offline behavior ─────────────────────────────────────────────────

#[test]
fn show_without_server_or_state_fails() {
    let (code, stdout, stderr) = run(&["show"], &[]);
    assert_eq!(code, 1);
    assert!(stdout.is_empty());
    assert!(stderr.contains("no server configuration available"), "stderr: {stderr}");
}

#[test]
fn flag_falls_back_to_default() {
    let (code, stdout, _) = run(&["flag", "autofill-v2", "--default", "fallback"], &[]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "fallback");
}

#[test]
fn unset_flag_without_default_fails() {
    let (code, _, stderr) = run(&["flag", "autofill-v2"], &[]);
    assert_eq!(code, 1);
    assert!(stderr.contains("'autofill-v2' is not set"), "stderr: {stderr}");
}

#[test]
fn flags_lists_every_known_flag_as_unset() {
    let (code, stdout, _) = run(&["flags"], &[]);
    assert_eq!(code, 0);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), FeatureFlag::ALL.len());
    for (line, flag) in lines.iter().zip(FeatureFlag::ALL) {
        assert!(line.starts_with(flag.as_str()), "line: {line}");
        assert!(line.ends_with("unset"), "line: {line}");
    }
}

// ── Stored state ─────────────────────────────────────────────────────

#[tokio::test]
async fn show_prints_stored_config_when_server_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    write_state(&path).await;

    let (code, stdout, _) = run(&["--state-path", path.to_str().unwrap(), "show"], &[]);
    assert_eq!(code, 0);

    let shown: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(shown["gitHash"], "stored-hash");
    assert_eq!(shown["server"]["name"], "selfhost");
    assert_eq!(shown["featureStates"]["autofill-v2"], true);
}

#[tokio::test]
async fn flag_reads_stored_value() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    write_state(&path).await;
    let path = path.to_str().unwrap().to_owned();

    let env = [("LOCKBOX_STORAGE", "file"), ("LOCKBOX_STATE_PATH", path.as_str())];
    let (code, stdout, _) = run(&["flag", "rollout"], &env);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "beta");

    // A default never overrides a set flag.
    let (code, stdout, _) = run(&["flag", "autofill-v2", "--default", "false"], &env);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "true");
}
