//! CLI smoke tests driving the built `tmir` binary.

mod common;

use std::fs;
use std::path::Path;

use common::{run_cli_case, tree_listing, write_file};
use serde_json::Value;

/// Write a config for one backup root named `docs`; returns the config path.
fn write_config(base: &Path, local: &Path, target: &Path, extra: &str) -> String {
    let config_path = base.join("config.toml");
    let body = format!(
        "[paths]\ndata_dir = {data:?}\n\n[remote]\ntarget = {target:?}\n{extra}\n[backups]\ndocs = {local:?}\n",
        data = base.join("data").to_string_lossy(),
        target = target.to_string_lossy(),
        local = local.to_string_lossy(),
    );
    fs::write(&config_path, body).expect("write config");
    config_path.to_string_lossy().into_owned()
}

#[test]
fn help_command_prints_usage() {
    let result = run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: tmir [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success());
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for subcmd in ["run", "verify", "config"] {
        let case_name = format!("subcommand_{subcmd}_help");
        let result = run_cli_case(&case_name, &[subcmd, "--help"]);
        assert!(
            result.status.success(),
            "subcommand '{subcmd} --help' failed; log: {}",
            result.log_path.display()
        );
        assert!(result.stdout.contains("Usage"));
    }
}

#[test]
fn config_path_reports_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let path_str = path.to_string_lossy();
    let result = run_cli_case(
        "config_path_reports_missing_file",
        &["--config", &path_str, "--json", "config", "path"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let lines = result.json_lines();
    assert_eq!(lines[0]["command"], "config path");
    assert_eq!(lines[0]["exists"], false);
}

#[test]
fn missing_explicit_config_is_a_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let result = run_cli_case(
        "missing_explicit_config_is_a_user_error",
        &["--config", &path.to_string_lossy(), "run"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("TMR-1002"));
}

#[test]
fn config_validate_accepts_and_rejects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), dir.path(), dir.path(), "");
    let ok = run_cli_case(
        "config_validate_accepts",
        &["--config", &config, "--json", "config", "validate"],
    );
    assert!(ok.status.success(), "log: {}", ok.log_path.display());
    let payload = &ok.json_lines()[0];
    assert_eq!(payload["valid"], true);
    assert_eq!(payload["roots"], 1);
    assert_eq!(payload["hash"].as_str().map(str::len), Some(16));

    let bad = write_config(dir.path(), dir.path(), dir.path(), "chunk_size_bytes = 10\n");
    let rejected = run_cli_case(
        "config_validate_rejects",
        &["--config", &bad, "--json", "config", "validate"],
    );
    assert_eq!(rejected.status.code(), Some(1));
    let payload = &rejected.json_lines()[0];
    assert_eq!(payload["valid"], false);
    assert_eq!(payload["code"], "TMR-1001");
}

#[test]
fn run_mirrors_then_verify_and_dry_run_find_nothing_to_do() {
    let base = tempfile::tempdir().expect("base");
    let local = tempfile::tempdir().expect("local");
    let target = tempfile::tempdir().expect("target");
    write_file(local.path(), "a.txt", b"alpha");
    write_file(local.path(), "sub/b.txt", b"bravo");
    let config = write_config(base.path(), local.path(), target.path(), "");

    let run = run_cli_case("cli_run_mirrors", &["--config", &config, "--json", "run"]);
    assert!(run.status.success(), "log: {}", run.log_path.display());
    let pass = &run.json_lines()[0];
    assert_eq!(pass["command"], "run");
    assert_eq!(pass["dry_run"], false);
    let root = &pass["report"]["roots"][0];
    assert_eq!(root["name"], "docs");
    assert_eq!(root["outcome"]["kind"], "completed");
    assert_eq!(root["actions"]["add_file"], 2);
    assert_eq!(
        tree_listing(&target.path().join("docs"), &[]),
        tree_listing(local.path(), &[])
    );

    let log = fs::read_to_string(base.path().join("data/activity.jsonl")).expect("activity log");
    let events: Vec<Value> = log
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    assert_eq!(events.first().map(|e| e["event"].clone()), Some(Value::from("agent_start")));
    assert!(events.iter().any(|e| e["event"] == "file_add"));
    assert!(events.iter().any(|e| e["event"] == "scan_complete"));
    assert_eq!(events.last().map(|e| e["event"].clone()), Some(Value::from("agent_stop")));

    let verify = run_cli_case(
        "cli_verify_after_run",
        &["--config", &config, "--json", "verify", "--deep"],
    );
    assert!(verify.status.success(), "log: {}", verify.log_path.display());
    let checked = &verify.json_lines()[0];
    assert_eq!(checked["ok"], true);
    assert_eq!(checked["persisted"], true);
    assert_eq!(checked["stats"]["files"], 2);

    write_file(local.path(), "c.txt", b"charlie");
    let dry = run_cli_case(
        "cli_dry_run_after_run",
        &["--config", &config, "--json", "run", "--dry-run"],
    );
    assert!(dry.status.success(), "log: {}", dry.log_path.display());
    let dry_pass = &dry.json_lines()[0];
    assert_eq!(dry_pass["dry_run"], true);
    assert_eq!(dry_pass["report"]["roots"][0]["actions"]["add_file"], 1);
    assert!(
        !target.path().join("docs/c.txt").exists(),
        "dry run must not touch the target"
    );
}

#[test]
fn run_against_missing_target_is_partial() {
    let base = tempfile::tempdir().expect("base");
    let local = tempfile::tempdir().expect("local");
    write_file(local.path(), "a.txt", b"alpha");
    let target = base.path().join("unmounted");
    let config = write_config(base.path(), local.path(), &target, "");

    let result = run_cli_case("run_against_missing_target", &["--config", &config, "--json", "run"]);
    assert_eq!(result.status.code(), Some(4), "log: {}", result.log_path.display());
    let pass = &result.json_lines()[0];
    assert_eq!(pass["report"]["roots"][0]["outcome"]["kind"], "disconnected");
}

#[test]
fn unknown_root_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), dir.path(), dir.path(), "");
    let result = run_cli_case(
        "unknown_root_is_rejected",
        &["--config", &config, "verify", "--root", "music"],
    );
    assert_eq!(result.status.code(), Some(1));
    assert!(result.stderr.contains("unknown backup root"));
}
