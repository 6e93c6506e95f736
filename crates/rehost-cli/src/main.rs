use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rehost_core::{
    backup, restore, BrowserProbe, DomainRule, ExplicitProfile, ProfileResolver, RehostError,
    RewriteContext, RunMode, StoreKind,
};
use rehost_store_sqlite::profile_orchestrator;
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "rehost.v1";
const DEFAULT_OLD_SUFFIX: &str = "test-domain.co";
const DEFAULT_NEW_SUFFIX: &str = "test-domain.co.uk";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_BROWSER_PROCESS: &str = "Firefox";
const DEFAULT_BACKUP_ROOT: &str = "./profile-backups";

#[derive(Debug, Parser)]
#[command(name = "rehost")]
#[command(about = "Back up, restore and rehost the domain references of a browser profile")]
struct Cli {
    /// Profile directory to operate on.
    #[arg(long, global = true)]
    profile_path: Option<PathBuf>,

    /// YAML settings file; command-line flags take precedence over its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    old_suffix: Option<String>,

    #[arg(long, global = true)]
    new_suffix: Option<String>,

    /// Pattern matched against running process command lines with `pgrep -f`.
    #[arg(long, global = true)]
    browser_process: Option<String>,

    #[arg(long, global = true)]
    busy_timeout_ms: Option<u64>,

    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Backup(BackupArgs),
    Restore(RestoreArgs),
    RewriteHistory(DryRunArgs),
    Rewrite(RewriteArgs),
    RewriteAll(DryRunArgs),
}

#[derive(Debug, Args)]
struct BackupArgs {
    /// Directory receiving the backup; defaults to the configured backup root.
    #[arg(long)]
    dest: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RestoreArgs {
    #[arg(long = "from")]
    from: PathBuf,
}

#[derive(Debug, Args)]
struct DryRunArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    #[arg(long, value_enum)]
    store: StoreArg,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreArg {
    History,
    Bookmarks,
    FormHistory,
    Cookies,
    Logins,
}

impl From<StoreArg> for StoreKind {
    fn from(value: StoreArg) -> Self {
        match value {
            StoreArg::History => Self::History,
            StoreArg::Bookmarks => Self::Bookmarks,
            StoreArg::FormHistory => Self::FormHistory,
            StoreArg::Cookies => Self::Cookies,
            StoreArg::Logins => Self::Logins,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Settings {
    profile_path: Option<PathBuf>,
    old_suffix: Option<String>,
    new_suffix: Option<String>,
    busy_timeout_ms: Option<u64>,
    browser_process: Option<String>,
    backup_root: Option<PathBuf>,
}

impl Settings {
    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", path.display()))
    }
}

/// Flags merged over the settings file merged over built-in defaults.
#[derive(Debug)]
struct Resolved {
    profile_path: Option<PathBuf>,
    old_suffix: String,
    new_suffix: String,
    busy_timeout: Duration,
    browser_process: String,
    backup_root: PathBuf,
    verbose: bool,
}

impl Resolved {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let settings = cli.config.as_deref().map(Settings::load).transpose()?.unwrap_or_default();
        Ok(Self {
            profile_path: cli.profile_path.clone().or(settings.profile_path),
            old_suffix: cli
                .old_suffix
                .clone()
                .or(settings.old_suffix)
                .unwrap_or_else(|| DEFAULT_OLD_SUFFIX.to_string()),
            new_suffix: cli
                .new_suffix
                .clone()
                .or(settings.new_suffix)
                .unwrap_or_else(|| DEFAULT_NEW_SUFFIX.to_string()),
            busy_timeout: Duration::from_millis(
                cli.busy_timeout_ms.or(settings.busy_timeout_ms).unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            ),
            browser_process: cli
                .browser_process
                .clone()
                .or(settings.browser_process)
                .unwrap_or_else(|| DEFAULT_BROWSER_PROCESS.to_string()),
            backup_root: settings.backup_root.unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_ROOT)),
            verbose: cli.verbose,
        })
    }

    fn profile(&self) -> Result<PathBuf> {
        let path = self
            .profile_path
            .as_ref()
            .ok_or_else(|| anyhow!("no profile directory given; pass --profile-path"))?;
        Ok(ExplicitProfile::new(path).resolve()?)
    }

    fn rewrite_context(&self, dry_run: bool) -> Result<RewriteContext> {
        let rule = DomainRule::new(&self.old_suffix, &self.new_suffix)?;
        Ok(RewriteContext::new(rule, RunMode::from_dry_run(dry_run))
            .with_busy_timeout(self.busy_timeout)
            .with_verbose(self.verbose))
    }

    fn probe(&self) -> PgrepProbe {
        PgrepProbe { pattern: self.browser_process.clone() }
    }
}

/// Liveness via `pgrep -f`. This process is ignored since its own arguments may contain the
/// pattern. A `pgrep` that cannot be spawned counts as "not running".
struct PgrepProbe {
    pattern: String,
}

impl BrowserProbe for PgrepProbe {
    fn is_running(&self) -> Result<bool, RehostError> {
        let output = match Process::new("pgrep").arg("-f").arg(&self.pattern).output() {
            Ok(output) => output,
            Err(err) => {
                tracing::debug!("pgrep unavailable, assuming browser is closed: {err}");
                return Ok(false);
            }
        };
        let own_pid = std::process::id();
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .any(|pid| pid != own_pid))
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let resolved = Resolved::from_cli(&cli)?;

    match cli.command {
        Command::Backup(args) => run_backup(&args, &resolved),
        Command::Restore(args) => run_restore(&args, &resolved),
        Command::RewriteHistory(args) => {
            run_rewrite_store(StoreKind::History, args.dry_run, &resolved)
        }
        Command::Rewrite(args) => run_rewrite_store(args.store.into(), args.dry_run, &resolved),
        Command::RewriteAll(args) => run_rewrite_all(args.dry_run, &resolved),
    }
}

fn run_backup(args: &BackupArgs, resolved: &Resolved) -> Result<()> {
    let profile = resolved.profile()?;
    let parent = args.dest.as_ref().unwrap_or(&resolved.backup_root);
    let outcome = backup(&resolved.probe(), &profile, Some(parent.as_path()))
        .with_context(|| format!("backup of {} failed", profile.display()))?;
    emit_json(serde_json::json!({
        "command": "backup",
        "profile": profile,
        "backup": outcome
    }))
}

fn run_restore(args: &RestoreArgs, resolved: &Resolved) -> Result<()> {
    let profile = resolved.profile()?;
    let outcome = restore(&resolved.probe(), &args.from, &profile)
        .with_context(|| format!("restore into {} failed", profile.display()))?;
    emit_json(serde_json::json!({
        "command": "restore",
        "restore": outcome
    }))
}

fn run_rewrite_store(store: StoreKind, dry_run: bool, resolved: &Resolved) -> Result<()> {
    let profile = resolved.profile()?;
    let ctx = resolved.rewrite_context(dry_run)?;
    let report = profile_orchestrator()
        .run_store(store, &profile, &ctx, &resolved.probe())
        .with_context(|| format!("{store} rewrite failed"))?;
    emit_json(serde_json::json!({
        "command": "rewrite",
        "dry_run": dry_run,
        "old_suffix": ctx.rule.old_suffix(),
        "new_suffix": ctx.rule.new_suffix(),
        "report": report
    }))
}

fn run_rewrite_all(dry_run: bool, resolved: &Resolved) -> Result<()> {
    let profile = resolved.profile()?;
    let ctx = resolved.rewrite_context(dry_run)?;
    match profile_orchestrator().run(&profile, &ctx, &resolved.probe()) {
        Ok(summary) => emit_json(serde_json::json!({
            "command": "rewrite-all",
            "dry_run": dry_run,
            "status": "ok",
            "old_suffix": ctx.rule.old_suffix(),
            "new_suffix": ctx.rule.new_suffix(),
            "summary": summary
        })),
        Err(failure) => {
            emit_json(serde_json::json!({
                "command": "rewrite-all",
                "dry_run": dry_run,
                "status": "failed",
                "failed_store": failure.store,
                "error": failure.error.to_string(),
                "completed": failure.completed
            }))?;
            Err(failure.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli> {
        Ok(Cli::try_parse_from(std::iter::once("rehost").chain(args.iter().copied()))?)
    }

    #[test]
    fn flags_override_settings_file_and_defaults_fill_the_rest() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let config = dir.path().join("rehost.yaml");
        fs::write(
            &config,
            "old_suffix: corp.example\nnew_suffix: corp.example.net\n\
             busy_timeout_ms: 500\nbackup_root: /tmp/backups\n",
        )?;
        let config = config.to_string_lossy().into_owned();

        let cli = parse(&["--config", &config, "--new-suffix", "example.org", "rewrite-all"])?;
        let resolved = Resolved::from_cli(&cli)?;
        assert_eq!(resolved.old_suffix, "corp.example");
        assert_eq!(resolved.new_suffix, "example.org");
        assert_eq!(resolved.busy_timeout, Duration::from_millis(500));
        assert_eq!(resolved.browser_process, DEFAULT_BROWSER_PROCESS);
        assert_eq!(resolved.backup_root, PathBuf::from("/tmp/backups"));
        Ok(())
    }

    #[test]
    fn unknown_settings_keys_are_rejected() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let config = dir.path().join("rehost.yaml");
        fs::write(&config, "old_sufix: typo.example\n")?;
        assert!(Settings::load(&config).is_err());
        Ok(())
    }

    #[test]
    fn store_names_accept_kebab_case() -> Result<()> {
        let cli = parse(&["rewrite", "--store", "form-history", "--dry-run"])?;
        let Command::Rewrite(args) = cli.command else {
            return Err(anyhow!("expected rewrite command"));
        };
        assert_eq!(StoreKind::from(args.store), StoreKind::FormHistory);
        assert!(args.dry_run);
        Ok(())
    }

    #[test]
    fn non_object_payloads_are_wrapped() {
        let wrapped = with_contract_version(Value::Bool(true));
        assert_eq!(wrapped["contract_version"], CLI_CONTRACT_VERSION);
        assert_eq!(wrapped["payload"], true);
    }
}
