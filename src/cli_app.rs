//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use treemirror::agent::signals::{SignalHandler, Wake};
use treemirror::agent::{BackupAgent, PassReport, RootOutcome, RootReport};
use treemirror::core::config::Config;
use treemirror::core::errors::MirrorError;
use treemirror::index::root::Root;
use treemirror::index::store::{NAME_FILE, RECORD_FILE};
use treemirror::logger::activity::{
    ActivityEvent, ActivityLoggerHandle, LoggerConfig, spawn_logger,
};
use treemirror::remote::local::DEFAULT_CHUNK_SIZE;
use treemirror::remote::{LocalDirRemote, MemoryRemote, Remote};
use treemirror::scanner::ignore::IgnoreList;

/// treemirror: mirror local directory trees onto a backup target.
#[derive(Debug, Parser)]
#[command(
    name = "tmir",
    author,
    version,
    about = "treemirror - incremental directory backup agent",
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
    /// Run backup passes over the configured roots.
    Run(RunArgs),
    /// Check the persisted index of each root.
    Verify(VerifyArgs),
    /// View configuration state.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Only back up the root with this name.
    #[arg(long, value_name = "NAME")]
    root: Option<String>,
    /// Diff against a scratch copy of the index without touching the target.
    #[arg(long)]
    dry_run: bool,
    /// Keep running, starting a new pass every N seconds.
    #[arg(long, value_name = "SECONDS")]
    repeat_secs: Option<u64>,
}

#[derive(Debug, Clone, Args, Default)]
struct VerifyArgs {
    /// Only verify the root with this name.
    #[arg(long, value_name = "NAME")]
    root: Option<String>,
    /// Also compare the in-memory encoding with the files on disk.
    #[arg(long)]
    deep: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Some roots did not complete.
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

impl From<MirrorError> for CliError {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::InvalidConfig { .. }
            | MirrorError::MissingConfig { .. }
            | MirrorError::ConfigParse { .. } => Self::User(err.to_string()),
            MirrorError::Serialization { .. } | MirrorError::RefreshState { .. } => {
                Self::Internal(err.to_string())
            }
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_backup(cli, args),
        Command::Verify(args) => run_verify(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

// ──────────────────── run ────────────────────

fn run_backup(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    check_root_selection(&config, args.root.as_deref())?;

    let ignore = IgnoreList::load(&config.paths.ignore_file)?.with_extra(&config.ignore.patterns)?;

    if args.dry_run {
        let scratch = ScratchRecords::stage(&config, args.root.as_deref())?;
        let agent = BackupAgent::new(config, MemoryRemote::new(), ignore, None)
            .with_root_filter(args.root.clone())
            .with_record_dir(scratch.path().to_path_buf());
        return drive(cli, args, agent, None);
    }

    let chunk_size = usize::try_from(config.remote.chunk_size_bytes).unwrap_or(DEFAULT_CHUNK_SIZE);
    let remote = LocalDirRemote::connect(&config.remote.target, chunk_size);
    if !remote.is_connected() {
        eprintln!(
            "[TMR-REMOTE] target {} is not reachable; roots will report disconnected",
            config.remote.target.display()
        );
    }

    let (logger, logger_join) = spawn_logger(LoggerConfig::for_path(config.paths.jsonl_log.clone()))?;
    logger.send(ActivityEvent::AgentStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash()?,
        roots: config.backups.len(),
    });

    let agent = BackupAgent::new(config, remote, ignore, Some(logger.clone()))
        .with_root_filter(args.root.clone());
    let result = drive(cli, args, agent, Some(&logger));

    logger.shutdown();
    if logger_join.join().is_err() {
        eprintln!("[TMR-JSONL] logger thread panicked during shutdown");
    }
    result
}

/// Run passes until done, stopped, or (without `--repeat-secs`) after one.
fn drive<R: Remote>(
    cli: &Cli,
    args: &RunArgs,
    mut agent: BackupAgent<R, IgnoreList>,
    logger: Option<&ActivityLoggerHandle>,
) -> Result<(), CliError> {
    let signals = SignalHandler::new();
    agent = agent.with_stop_flag(signals.shutdown_flag());
    let mode = output_mode(cli);
    let started = Instant::now();
    let mut passes: u64 = 0;

    let (last, reason) = loop {
        let report = agent.run_pass();
        passes += 1;
        emit_pass(mode, args.dry_run, passes, &report)?;

        if signals.should_shutdown() {
            break (report, "signal");
        }
        let Some(secs) = args.repeat_secs else {
            break (report, "completed");
        };
        match signals.idle(Duration::from_secs(secs)) {
            Wake::Shutdown => break (report, "signal"),
            Wake::Reload => reload_config(cli, &mut agent),
            Wake::Elapsed | Wake::RunNow => {}
        }
    };

    if let Some(logger) = logger {
        logger.send(ActivityEvent::AgentStopped {
            reason: reason.to_string(),
            passes,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        let dropped = logger.dropped_events();
        if dropped > 0 {
            eprintln!("[TMR-JSONL] {dropped} activity events dropped under back-pressure");
        }
    }

    pass_result(&last)
}

fn reload_config<R: Remote>(cli: &Cli, agent: &mut BackupAgent<R, IgnoreList>) {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            if config.remote.target != agent.config().remote.target {
                eprintln!("[TMR-CONFIG] remote target changes take effect after restart");
            }
            eprintln!("[TMR-CONFIG] configuration reloaded");
            agent.set_config(config);
        }
        Err(e) => eprintln!("[TMR-CONFIG] reload failed, keeping previous config: {e}"),
    }
}

fn check_root_selection(config: &Config, root: Option<&str>) -> Result<(), CliError> {
    if config.backups.is_empty() {
        return Err(CliError::User(format!(
            "no backup roots configured in {}",
            config.paths.config_file.display()
        )));
    }
    match root {
        Some(name) if !config.backups.contains_key(name) => {
            Err(CliError::User(format!("unknown backup root: {name}")))
        }
        _ => Ok(()),
    }
}

/// Exit status for a finished run.
fn pass_result(report: &PassReport) -> Result<(), CliError> {
    let incomplete = report
        .roots
        .iter()
        .filter(|r| matches!(r.outcome, RootOutcome::Disconnected | RootOutcome::Failed { .. }))
        .count();
    let failed = report.total_failed();
    if incomplete > 0 || failed > 0 {
        return Err(CliError::Partial(format!(
            "{incomplete} of {} roots incomplete, {failed} actions failed",
            report.roots.len()
        )));
    }
    Ok(())
}

fn emit_pass(mode: OutputMode, dry_run: bool, pass: u64, report: &PassReport) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            let label = if dry_run { "Dry-run pass" } else { "Pass" };
            println!("{label} {pass}:");
            for root in &report.roots {
                print_root_report(root);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "pass": pass,
                "dry_run": dry_run,
                "report": serde_json::to_value(report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_root_report(root: &RootReport) {
    let a = &root.actions;
    println!(
        "  {:<16} {:<12} +{} dirs  +{} files  ~{} modified  -{} dirs  -{} files  failed {}  {}ms",
        root.name,
        outcome_label(&root.outcome),
        a.add_dir,
        a.add_file,
        a.modify_file,
        a.delete_dir,
        a.delete_file,
        root.failed,
        root.duration_ms,
    );
    if let RootOutcome::Failed { message, .. } = &root.outcome {
        println!("    {message}");
    }
}

fn outcome_label(outcome: &RootOutcome) -> ColoredString {
    let text = outcome.as_str();
    match outcome {
        RootOutcome::Completed => text.green(),
        RootOutcome::Interrupted | RootOutcome::Skipped => text.yellow(),
        RootOutcome::Disconnected | RootOutcome::Failed { .. } => text.red().bold(),
    }
}

/// Throwaway copy of the record directories for a dry run.
struct ScratchRecords {
    dir: PathBuf,
}

impl ScratchRecords {
    fn stage(config: &Config, only: Option<&str>) -> Result<Self, CliError> {
        let dir = std::env::temp_dir().join(format!(
            "tmir-dry-run-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let scratch = Self { dir };
        for name in config.backups.keys() {
            if only.is_some_and(|o| o != name) {
                continue;
            }
            let source = config.paths.root_record_dir(name);
            let target = scratch.dir.join(name);
            fs::create_dir_all(&target)
                .map_err(|e| CliError::Runtime(format!("create {}: {e}", target.display())))?;
            for file in [RECORD_FILE, NAME_FILE] {
                let from = source.join(file);
                if from.exists() {
                    fs::copy(&from, target.join(file))
                        .map_err(|e| CliError::Runtime(format!("copy {}: {e}", from.display())))?;
                }
            }
        }
        Ok(scratch)
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ScratchRecords {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

// ──────────────────── verify ────────────────────

fn run_verify(cli: &Cli, args: &VerifyArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    check_root_selection(&config, args.root.as_deref())?;
    let mode = output_mode(cli);

    let mut failures = 0usize;
    let mut checked = 0usize;
    for (name, local) in &config.backups {
        if args.root.as_deref().is_some_and(|r| r != name) {
            continue;
        }
        checked += 1;
        let record_dir = config.paths.root_record_dir(name);
        let result = verify_root(name, local, &record_dir, args.deep);
        if result.get("ok") == Some(&Value::Bool(false)) {
            failures += 1;
        }
        match mode {
            OutputMode::Human => print_verify_result(name, &result),
            OutputMode::Json => {
                let mut payload = json!({ "command": "verify", "root": name });
                if let (Value::Object(target), Value::Object(extra)) = (&mut payload, result) {
                    target.extend(extra);
                }
                write_json_line(&payload)?;
            }
        }
    }

    if failures > 0 {
        return Err(CliError::Partial(format!(
            "{failures} of {checked} roots failed verification"
        )));
    }
    Ok(())
}

/// Load and check one root; the result is a JSON object with an `ok` field.
fn verify_root(name: &str, local: &Path, record_dir: &Path, deep: bool) -> Value {
    if !record_dir.join(RECORD_FILE).exists() {
        return json!({ "ok": true, "state": "absent" });
    }
    let root = match Root::load(name, local, record_dir) {
        Ok(root) => root,
        Err(e) => return json!({ "ok": false, "code": e.code(), "error": e.to_string() }),
    };
    let stats = match root.verify() {
        Ok(stats) => stats,
        Err(e) => return json!({ "ok": false, "code": e.code(), "error": e.to_string() }),
    };
    let mut result = json!({ "ok": true, "state": "valid", "stats": stats });
    if deep {
        match root.check_persisted() {
            Ok(true) => result["persisted"] = Value::Bool(true),
            Ok(false) => {
                result["ok"] = Value::Bool(false);
                result["persisted"] = Value::Bool(false);
                result["error"] = Value::String("index files differ from the loaded tree".to_string());
            }
            Err(e) => {
                result["ok"] = Value::Bool(false);
                result["code"] = Value::String(e.code().to_string());
                result["error"] = Value::String(e.to_string());
            }
        }
    }
    result
}

fn print_verify_result(name: &str, result: &Value) {
    let ok = result.get("ok") == Some(&Value::Bool(true));
    let label = if ok { "ok".green() } else { "FAILED".red().bold() };
    match result.get("stats") {
        Some(stats) => println!(
            "  {name:<16} {label}  {} dirs  {} files  {} pending  {} free",
            stats["dirs"], stats["files"], stats["pending"], stats["free"],
        ),
        None if result.get("state") == Some(&Value::String("absent".to_string())) => {
            println!("  {name:<16} {label}  (no index yet)");
        }
        None => println!("  {name:<16} {label}"),
    }
    if let Some(error) = result.get("error").and_then(Value::as_str) {
        println!("    {error}");
    }
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Roots: {}", config.backups.len());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "roots": config.backups.len(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("TMIR_OUTPUT_FORMAT").ok();
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
