mod common;

use std::fs;
use std::path::Path;

use serde_json::Value;

fn json_line(stdout: &str) -> Value {
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON line in stdout: {stdout}"));
    serde_json::from_str(line).unwrap()
}

fn aged_zip(dir: &Path, name: &str, age_days: i64) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, vec![0_u8; 64]).unwrap();
    let now = filetime::FileTime::now().unix_seconds();
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(now - age_days * 86_400, 0))
        .unwrap();
    path
}

#[test]
fn help_lists_commands() {
    let result = common::run_cli_case("help_lists_commands", &["--help"]);
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    for command in ["status", "preview", "run", "delete", "ack", "daemon", "event"] {
        assert!(result.stdout.contains(command), "missing {command}");
    }
}

#[test]
fn config_path_reports_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path());
    let config_arg = config.to_string_lossy().into_owned();
    let result = common::run_cli_case(
        "config_path_reports_override",
        &["--config", &config_arg, "config", "path"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let body = json_line(&result.stdout);
    assert_eq!(body["exists"], true);
    assert_eq!(body["path"], config_arg.as_str());
}

#[test]
fn missing_explicit_config_is_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let result = common::run_cli_case(
        "missing_explicit_config_is_runtime_error",
        &["--config", &missing.to_string_lossy(), "status"],
    );
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
}

#[test]
fn status_emits_both_scopes_and_initializes_nothing_destructive() {
    let root = tempfile::tempdir().unwrap();
    let root_path = fs::canonicalize(root.path()).unwrap();
    let config = common::write_config(&root_path);
    let zip = aged_zip(&root_path.join("backups"), "session_1.zip", 40);

    let result = common::run_cli_case(
        "status_emits_both_scopes",
        &["--config", &config.to_string_lossy(), "status"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let body = json_line(&result.stdout);
    assert_eq!(body["command"], "status");
    assert_eq!(body["ok"], true);
    let scopes = body["scopes"].as_array().unwrap();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0]["scope"], "backups");
    assert_eq!(scopes[1]["scope"], "stale_worlds");
    assert!(zip.exists());
}

#[test]
fn deleting_newest_backup_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let root_path = fs::canonicalize(root.path()).unwrap();
    let config = common::write_config(&root_path);
    let backups = root_path.join("backups");
    aged_zip(&backups, "session_old.zip", 30);
    let newest = aged_zip(&backups, "session_new.zip", 1);

    let result = common::run_cli_case(
        "deleting_newest_backup_is_rejected",
        &[
            "--config",
            &config.to_string_lossy(),
            "delete",
            &newest.to_string_lossy(),
        ],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let body = json_line(&result.stdout);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error_code"], "ineligible_selection");
    assert!(newest.exists());
}

#[test]
fn manual_delete_dry_run_then_apply() {
    let root = tempfile::tempdir().unwrap();
    let root_path = fs::canonicalize(root.path()).unwrap();
    let config = common::write_config(&root_path);
    let config_arg = config.to_string_lossy().into_owned();
    let backups = root_path.join("backups");
    let old = aged_zip(&backups, "session_old.zip", 30);
    aged_zip(&backups, "session_new.zip", 1);
    let old_arg = old.to_string_lossy().into_owned();

    let dry = common::run_cli_case(
        "manual_delete_dry_run",
        &["--config", &config_arg, "delete", "--dry-run", &old_arg],
    );
    assert!(dry.status.success(), "log: {}", dry.log_path.display());
    let body = json_line(&dry.stdout);
    assert_eq!(body["command"], "delete");
    assert_eq!(body["dry_run"], true);
    assert!(old.exists());

    let applied = common::run_cli_case(
        "manual_delete_apply",
        &["--config", &config_arg, "delete", &old_arg],
    );
    assert!(applied.status.success(), "log: {}", applied.log_path.display());
    let body = json_line(&applied.stdout);
    assert_eq!(body["result"]["deleted_count"], 1);
    assert!(!old.exists());

    let history = fs::read_to_string(root_path.join("data").join("cleanup_history.json")).unwrap();
    let history: Value = serde_json::from_str(&history).unwrap();
    assert_eq!(history["runs"].as_array().unwrap().len(), 2);
    let audit = fs::read_to_string(root_path.join("data").join("cleanup.log")).unwrap();
    assert!(audit.contains("manual_delete"));
}

#[test]
fn unknown_scope_is_a_usage_error() {
    let result = common::run_cli_case(
        "unknown_scope_is_a_usage_error",
        &["preview", "--scope", "everything"],
    );
    assert!(!result.status.success());
    assert!(result.stderr.contains("everything"));
}
