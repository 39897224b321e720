use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use sift::changes;
use sift::config::{
    self, CONFIG_FILE, ConfigError, Overrides, RunConfig, default_config_yaml,
    find_nearest_config, load_config_file,
};
use sift::harness::{Outcome, Session, SessionError};
use sift::store::{self, CoverageRecord, DEFAULT_STORE_FILE, TestId};
use sift::trace::ScopeRoot;

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        let code = match &value {
            ConfigError::Io(_) => "config_io_error",
            ConfigError::Yaml(_) => "config_parse_error",
            ConfigError::InvalidMode(_) => "invalid_mode",
            ConfigError::MissingBaseline(_) => "missing_baseline",
        };
        Self::new(code, value.to_string())
    }
}

impl From<SessionError> for CliError {
    fn from(value: SessionError) -> Self {
        let code = match &value {
            SessionError::Scope(_) => "scope_error",
            SessionError::Change(changes::ChangeError::Git(_)) => "git_error",
            SessionError::Change(changes::ChangeError::Format(_)) => "diff_format_error",
            SessionError::Trace(_) => "trace_error",
            SessionError::Store(_) => "store_write_error",
            SessionError::MissingBaseline => "missing_baseline",
        };
        Self::new(code, value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(about = "Select the minimal set of tests to re-run, from recorded coverage and a baseline diff")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config file next to the current directory
    Init,
    /// Partition candidate tests (stdin, one `<file>::<name>` per line) into keep and skip
    Plan(PlanArgs),
    /// Fold one observed test result into the coverage store
    Record(RecordArgs),
    /// Dump the coverage store
    Show(ShowArgs),
    /// Print the change set against a baseline revision
    Changes(ChangesArgs),
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Running mode: `all` runs every test untouched, `skip` skips stale
    /// tests and refreshes coverage on the rest, `gather` runs everything
    /// while refreshing coverage, `cache` skips without refreshing
    #[arg(long)]
    mode: Option<String>,
    /// Revision to diff the working tree against
    #[arg(long)]
    baseline: Option<String>,
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Test identity as `<file>::<name>`
    #[arg(long)]
    test: String,
    /// Observed outcome: passed, failed, or skipped
    #[arg(long)]
    outcome: String,
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ChangesArgs {
    /// Revision to diff against; falls back to the configured baseline
    baseline: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    match cli.command {
        Command::Init => cmd_init(&cwd),
        Command::Plan(args) => cmd_plan(&cwd, args),
        Command::Record(args) => cmd_record(&cwd, args),
        Command::Show(args) => cmd_show(&cwd, args),
        Command::Changes(args) => cmd_changes(&cwd, args),
    }
}

fn cmd_init(cwd: &Path) -> Result<(), CliError> {
    let config_path = cwd.join(CONFIG_FILE);
    let created = if config_path.exists() {
        false
    } else {
        fs::write(&config_path, default_config_yaml())
            .map_err(|err| CliError::io("write_error", err))?;
        true
    };

    print_json(&json!({
        "status": "ok",
        "config": config_path,
        "created": created,
    }))
}

fn cmd_plan(cwd: &Path, args: PlanArgs) -> Result<(), CliError> {
    let overrides = Overrides {
        mode: args.mode,
        baseline: args.baseline,
        store: args.store,
    };
    let run_config = RunConfig::resolve(cwd, &overrides)?;
    let session = Session::configure(ScopeRoot::Dir(cwd.to_path_buf()), &run_config)?;

    let candidates = read_candidates(cwd)?;
    let selection = session.plan(&candidates)?;

    print_json(&json!({
        "status": "ok",
        "generated_at": now_iso8601(),
        "mode": run_config.mode.as_str(),
        "baseline": run_config.baseline,
        "store": run_config.store_path,
        "candidate_count": candidates.len(),
        "keep_count": selection.keep.len(),
        "skip_count": selection.skip.len(),
        "keep": selection.keep.iter().map(TestId::key).collect::<Vec<_>>(),
        "skip": selection.skip.iter().map(TestId::key).collect::<Vec<_>>(),
    }))
}

fn cmd_record(cwd: &Path, args: RecordArgs) -> Result<(), CliError> {
    let store_path = resolve_store_path(cwd, args.store)?;
    let id = parse_candidate(cwd, &args.test)?;
    let outcome = Outcome::parse(&args.outcome).ok_or_else(|| {
        CliError::new(
            "invalid_outcome",
            format!("expected passed, failed, or skipped, got `{}`", args.outcome),
        )
    })?;

    let mut coverage = store::load(&store_path);
    match outcome {
        Outcome::Passed => {
            let files = read_file_lines(cwd)?;
            coverage.insert(
                id.key(),
                CoverageRecord {
                    files,
                    fspath: id.file.clone(),
                },
            );
        }
        Outcome::Failed => {
            coverage.remove(&id.key());
        }
        Outcome::Skipped => {}
    }
    store::save(&store_path, &coverage).map_err(|err| CliError::io("store_write_error", err))?;

    print_json(&json!({
        "status": "ok",
        "test": id.key(),
        "outcome": outcome.as_str(),
        "store": store_path,
        "entry_count": coverage.len(),
    }))
}

fn cmd_show(cwd: &Path, args: ShowArgs) -> Result<(), CliError> {
    let store_path = resolve_store_path(cwd, args.store)?;
    let coverage = store::load(&store_path);

    let entries = coverage
        .iter()
        .map(|(key, record)| {
            json!({
                "test": key,
                "fspath": record.fspath,
                "files": record.files,
            })
        })
        .collect::<Vec<_>>();

    print_json(&json!({
        "status": "ok",
        "store": store_path,
        "version": store::STORE_VERSION,
        "entry_count": entries.len(),
        "coverage": entries,
    }))
}

fn cmd_changes(cwd: &Path, args: ChangesArgs) -> Result<(), CliError> {
    let file = match find_nearest_config(cwd) {
        Some(path) => load_config_file(&path)?,
        None => config::FileConfig::default(),
    };
    let baseline = args
        .baseline
        .filter(|raw| !raw.trim().is_empty())
        .or(file.baseline)
        .ok_or_else(|| {
            CliError::new(
                "missing_baseline",
                "no baseline revision given or configured",
            )
        })?;

    let set = changes::since(&baseline).map_err(|err| match err {
        changes::ChangeError::Git(inner) => CliError::new("git_error", inner.to_string()),
        changes::ChangeError::Format(inner) => {
            CliError::new("diff_format_error", inner.to_string())
        }
    })?;

    let tests = set
        .tests
        .iter()
        .map(|(file, name)| json!({ "file": file, "name": name }))
        .collect::<Vec<_>>();

    print_json(&json!({
        "status": "ok",
        "baseline": baseline,
        "changed_files": set.files,
        "changed_file_count": set.files.len(),
        "changed_tests": tests,
        "changed_test_count": tests.len(),
    }))
}

fn resolve_store_path(cwd: &Path, flag: Option<PathBuf>) -> Result<PathBuf, CliError> {
    let configured = match find_nearest_config(cwd) {
        Some(path) => load_config_file(&path)?.store,
        None => None,
    };
    let store = flag
        .or(configured)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE));
    Ok(absolutize(cwd, store))
}

fn read_candidates(cwd: &Path) -> Result<Vec<TestId>, CliError> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|err| CliError::io("stdin_error", err))?;

    let mut out = Vec::new();
    for line in buffer.lines() {
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        out.push(parse_candidate(cwd, raw)?);
    }
    Ok(out)
}

fn read_file_lines(cwd: &Path) -> Result<std::collections::BTreeSet<PathBuf>, CliError> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|err| CliError::io("stdin_error", err))?;

    Ok(buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| absolutize(cwd, PathBuf::from(line)))
        .collect())
}

fn parse_candidate(cwd: &Path, raw: &str) -> Result<TestId, CliError> {
    let id = TestId::parse(raw).ok_or_else(|| {
        CliError::new(
            "invalid_candidate",
            format!("expected `<file>::<name>`, got `{raw}`"),
        )
    })?;
    Ok(TestId {
        file: absolutize(cwd, id.file),
        name: id.name,
    })
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
