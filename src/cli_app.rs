//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use world_retention::core::config::EngineConfig;
use world_retention::daemon::scheduler::Scheduler;
use world_retention::daemon::signals::SignalHandler;
use world_retention::engine::evaluate::EvaluationResult;
use world_retention::engine::service::{ControlError, ErrorCode, RetentionService, RunOutcome};
use world_retention::policy::model::{EventKind, Scope};
use world_retention::store::missed_runs::MissedRunLog;

/// World retention: prunes backup archives and archived worlds under a guarded policy.
#[derive(Debug, Parser)]
#[command(
    name = "wret",
    author,
    version,
    about = "World Retention - backup and archived-world cleanup",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show policy, storage, next run, and missed runs per scope.
    Status(StatusArgs),
    /// Show what the saved rules would delete right now.
    Preview(ScopeArgs),
    /// Run the saved rules (or a single rule) now.
    Run(RunArgs),
    /// Delete an explicit selection of artifacts.
    Delete(DeleteArgs),
    /// Acknowledge missed runs for a scope.
    Ack(AckArgs),
    /// Replace a scope's rules from a JSON payload.
    Rules(PayloadArgs),
    /// Replace a scope's schedules from a JSON payload.
    Schedules(PayloadArgs),
    /// Fire an external event (server_boot, server_shutdown, low_free_space).
    Event(EventArgs),
    /// Run the background scheduler until SIGTERM/SIGINT.
    Daemon,
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct StatusArgs {
    /// Limit to one scope (backups|stale_worlds).
    #[arg(long, value_name = "SCOPE")]
    scope: Option<Scope>,
}

#[derive(Debug, Clone, Args)]
struct ScopeArgs {
    /// Policy scope (backups|stale_worlds).
    #[arg(long, value_name = "SCOPE", default_value = "backups")]
    scope: Scope,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Run only this rule (age|count|space).
    #[arg(long, value_name = "RULE")]
    rule: Option<String>,
    /// Evaluate and record history without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct DeleteArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Paths to delete, exactly as listed by `preview`.
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
    /// Validate the selection without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct AckArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// Name recorded as the acknowledger.
    #[arg(long, value_name = "NAME")]
    by: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct PayloadArgs {
    #[command(flatten)]
    scope: ScopeArgs,
    /// JSON file to read, or `-` for stdin.
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct EventArgs {
    /// Event name.
    #[arg(value_name = "EVENT")]
    event: EventKind,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Status(args) => run_status(cli, args),
        Command::Preview(args) => run_preview(cli, args),
        Command::Run(args) => run_rules(cli, args),
        Command::Delete(args) => run_delete(cli, args),
        Command::Ack(args) => run_ack(cli, args),
        Command::Rules(args) => run_save(cli, args, PayloadKind::Rules),
        Command::Schedules(args) => run_save(cli, args, PayloadKind::Schedules),
        Command::Event(args) => run_event(cli, args),
        Command::Daemon => run_daemon(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── shared plumbing ────────────────────

fn load_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    EngineConfig::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

fn service(cli: &Cli) -> Result<(EngineConfig, RetentionService), CliError> {
    let config = load_config(cli)?;
    let service = RetentionService::from_config(&config);
    Ok((config, service))
}

/// Identity stamped into `last_changed_by` and audit details.
fn operator() -> String {
    std::env::var("USER").map_or_else(|_| "cli".to_string(), |user| format!("cli:{user}"))
}

/// Report a control rejection in the active output mode and map it to an exit code.
fn control_failure(mode: OutputMode, err: &ControlError) -> Result<CliError, CliError> {
    if mode == OutputMode::Json {
        write_json_line(&err.to_json())?;
    }
    Ok(match err {
        ControlError::Rejected { code, .. } if code.is_retryable() => {
            CliError::Runtime(err.to_string())
        }
        ControlError::Rejected { code, details } => {
            if mode == OutputMode::Human
                && *code == ErrorCode::IneligibleSelection
                && let Some(paths) = details.as_ref().and_then(|d| d["paths"].as_array())
            {
                for path in paths {
                    eprintln!("  {} {}", "ineligible:".red(), path.as_str().unwrap_or_default());
                }
            }
            CliError::User(err.to_string())
        }
        ControlError::Storage(_) => CliError::Runtime(err.to_string()),
    })
}

fn emit<T: Serialize>(mode: OutputMode, command: &str, payload: &T) -> Result<(), CliError> {
    if mode == OutputMode::Json {
        let mut value = serde_json::to_value(payload)?;
        if let Value::Object(map) = &mut value {
            map.insert("command".to_string(), json!(command));
            map.entry("ok").or_insert(json!(true));
        }
        write_json_line(&value)?;
    }
    Ok(())
}

// ──────────────────── commands ────────────────────

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (_, service) = service(cli)?;
    let scopes: Vec<Scope> = args.scope.map_or_else(|| Scope::ALL.to_vec(), |s| vec![s]);

    let mut snapshots = Vec::with_capacity(scopes.len());
    for scope in scopes {
        match service.snapshot(scope) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => return Err(control_failure(mode, &err)?),
        }
    }
    if mode == OutputMode::Json {
        return write_json_line(&json!({
            "command": "status",
            "ok": true,
            "scopes": serde_json::to_value(&snapshots)?,
        }));
    }

    for snapshot in &snapshots {
        let scope = snapshot.scope;
        let meta = &snapshot.profile.meta;
        println!("{}", format!("[{scope}]").bold());
        match snapshot.storage {
            Some(usage) => println!(
                "  storage:     {:.1}% used, {} free of {}",
                usage.used_pct,
                human_bytes(usage.free_bytes),
                human_bytes(usage.total_bytes)
            ),
            None => println!("  storage:     {}", "unavailable".yellow()),
        }
        println!(
            "  rules:       {} (v{})",
            if snapshot.profile.rules.enabled {
                "enabled".green()
            } else {
                "disabled".yellow()
            },
            meta.rule_version
        );
        println!("  next run:    {}", snapshot.next_run_at);
        if meta.last_run_at.is_empty() {
            println!("  last run:    -");
        } else {
            println!(
                "  last run:    {} via {} ({}, deleted {}, errors {})",
                meta.last_run_at,
                meta.last_run_trigger,
                meta.last_run_result,
                meta.last_run_deleted,
                meta.last_run_errors
            );
        }
        print_missed(scope, &snapshot.missed_runs);
        println!(
            "  preview:     {} eligible, {} matched, {} within cap",
            snapshot.preview.eligible_count,
            snapshot.preview.requested_delete_count,
            snapshot.preview.capped_delete_count
        );
    }
    Ok(())
}

fn print_missed(scope: Scope, log: &MissedRunLog) {
    let missed: Vec<_> = log.for_scope(scope).collect();
    if missed.is_empty() {
        println!("  missed runs: {}", "none".green());
        return;
    }
    println!("  missed runs: {}", missed.len().to_string().red());
    for event in missed.iter().rev().take(5) {
        println!("    {} {} {}", event.at, event.reason, event.schedule_id);
    }
}

fn run_preview(cli: &Cli, args: &ScopeArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (_, service) = service(cli)?;
    let result = service
        .preview(args.scope)
        .map_err(|err| control_failure(mode, &err).unwrap_or_else(|e| e))?;
    emit(mode, "preview", &result)?;
    if mode == OutputMode::Human {
        print_result(args.scope, &result, true);
    }
    Ok(())
}

fn run_rules(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (_, service) = service(cli)?;
    let outcome = service
        .run_rules(args.scope.scope, args.rule.as_deref(), args.dry_run, &operator())
        .map_err(|err| control_failure(mode, &err).unwrap_or_else(|e| e))?;
    finish_run(mode, "run", args.scope.scope, &outcome)
}

fn run_delete(cli: &Cli, args: &DeleteArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (_, service) = service(cli)?;
    let selected: Vec<PathBuf> = args
        .paths
        .iter()
        .map(|p| fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
        .collect();
    let outcome = service
        .manual_delete(args.scope.scope, &selected, args.dry_run, &operator())
        .map_err(|err| control_failure(mode, &err).unwrap_or_else(|e| e))?;
    finish_run(mode, "delete", args.scope.scope, &outcome)
}

fn finish_run(
    mode: OutputMode,
    command: &str,
    scope: Scope,
    outcome: &RunOutcome,
) -> Result<(), CliError> {
    emit(mode, command, outcome)?;
    if mode == OutputMode::Human {
        print_result(scope, &outcome.result, outcome.dry_run);
    }
    if outcome.result.errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} of {} deletions failed",
            outcome.result.errors.len(),
            outcome.result.capped_delete_count
        )))
    }
}

fn print_result(scope: Scope, result: &EvaluationResult, dry_run: bool) {
    let verb = if dry_run { "would delete" } else { "deleted" };
    println!(
        "{} {} eligible, {} matched, {} within cap, {verb} {} ({})",
        format!("[{scope}]").bold(),
        result.eligible_count,
        result.requested_delete_count,
        result.capped_delete_count,
        result.deleted_count,
        human_bytes(result.deleted_bytes)
    );
    for item in result.items.iter().filter(|i| i.selected_for_delete) {
        let reasons: Vec<&str> = item.reasons.iter().map(|r| r.as_str()).collect();
        println!(
            "  {} {} {} [{}]",
            "-".red(),
            item.path.display(),
            human_bytes(item.size).dimmed(),
            reasons.join(",")
        );
    }
    for error in &result.errors {
        eprintln!("  {} {error}", "error:".red().bold());
    }
}

fn run_ack(cli: &Cli, args: &AckArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (_, service) = service(cli)?;
    let by = args.by.clone().unwrap_or_else(operator);
    let log = service
        .ack_missed_runs(args.scope.scope, &by)
        .map_err(|err| control_failure(mode, &err).unwrap_or_else(|e| e))?;
    emit(mode, "ack", &log)?;
    if mode == OutputMode::Human {
        println!(
            "Acknowledged missed runs for {} ({} remaining in other scopes).",
            args.scope.scope,
            log.missed_runs.len()
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum PayloadKind {
    Rules,
    Schedules,
}

fn read_payload(file: &PathBuf) -> Result<Value, CliError> {
    let raw = if file.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(file)
            .map_err(|e| CliError::User(format!("cannot read {}: {e}", file.display())))?
    };
    serde_json::from_str(&raw).map_err(|e| CliError::User(format!("payload is not JSON: {e}")))
}

fn run_save(cli: &Cli, args: &PayloadArgs, kind: PayloadKind) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (_, service) = service(cli)?;
    let payload = read_payload(&args.file)?;
    let scope = args.scope.scope;
    let fail = |err: ControlError| control_failure(mode, &err).unwrap_or_else(|e| e);
    match kind {
        PayloadKind::Rules => {
            let saved = service.save_rules(scope, &payload, &operator()).map_err(fail)?;
            emit(mode, "rules", &saved)?;
            if mode == OutputMode::Human {
                println!(
                    "Saved {scope} rules (v{}).",
                    saved.profile.meta.rule_version
                );
                print_result(scope, &saved.preview, true);
            }
        }
        PayloadKind::Schedules => {
            let profile = service
                .save_schedules(scope, &payload, &operator())
                .map_err(fail)?;
            emit(mode, "schedules", &profile)?;
            if mode == OutputMode::Human {
                println!(
                    "Saved {} {scope} schedule(s) (v{}).",
                    profile.schedules.len(),
                    profile.meta.schedule_version
                );
            }
        }
    }
    Ok(())
}

fn run_event(cli: &Cli, args: &EventArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let (config, service) = service(cli)?;
    let scheduler = Scheduler::new(Arc::new(service), config.scheduler);
    let report = scheduler
        .fire_event(args.event)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    if mode == OutputMode::Json {
        write_json_line(&json!({
            "command": "event",
            "ok": true,
            "event": args.event.as_str(),
            "fired": report.fired,
            "missed": report.missed,
        }))?;
    } else {
        println!(
            "Event {}: {} run(s), {} missed.",
            args.event,
            report.fired.len(),
            report.missed
        );
    }
    Ok(())
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let (config, service) = service(cli)?;
    let hash = config.stable_hash().unwrap_or_default();
    eprintln!(
        "[WRT-SCHED] starting scheduler v{} (config {hash}, tick {}s)",
        env!("CARGO_PKG_VERSION"),
        config.scheduler.tick_interval_secs
    );
    let signals = SignalHandler::new();
    let (shutdown, tick_now) = signals
        .bridge(Duration::from_millis(250))
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let scheduler = Scheduler::new(Arc::new(service), config.scheduler);
    scheduler.run(&shutdown, &tick_now);
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(EngineConfig::default_path);
            let exists = path.exists();
            match mode {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            match mode {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match EngineConfig::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config
                    .stable_hash()
                    .map_err(|e| CliError::Runtime(e.to_string()))?;
                match mode {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": true,
                        "path": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    }))?,
                }
                Ok(())
            }
            Err(e) => {
                match mode {
                    OutputMode::Human => eprintln!("{} {e}", "Configuration is INVALID:".red()),
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": false,
                        "error": e.to_string(),
                    }))?,
                }
                Err(CliError::User(format!("invalid configuration: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("WRT_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scoped_run() {
        let cli = Cli::try_parse_from([
            "wret", "--json", "run", "--scope", "stale_worlds", "--rule", "age", "--dry-run",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scope.scope, Scope::StaleWorlds);
                assert_eq!(args.rule.as_deref(), Some("age"));
                assert!(args.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_scope_and_event() {
        assert!(Cli::try_parse_from(["wret", "preview", "--scope", "worlds"]).is_err());
        assert!(Cli::try_parse_from(["wret", "event", "server_crash"]).is_err());
        assert!(Cli::try_parse_from(["wret", "delete", "--scope", "backups"]).is_err());
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("weird"), false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
    }

    #[test]
    fn human_bytes_scales() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
