use anyhow::Result;
use clap::{Parser, Subcommand};
use core_actions::{DispatchOutcome, Orchestrator, PlugError, TrashDir, dispatch};
use core_config::{Settings, load_from};
use core_events::{HostCommand, ViewHandle};
use core_process::{ProcessRunner, Runner};
use core_state::{BatchSnapshot, FileLogStore, SNAPSHOT_FILE_NAME};
use core_vcs::{Git, GitOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Once};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod host;

use host::TerminalHost;

const LOG_FILE_NAME: &str = "oxplug.log";
const TRASH_DIR_NAME: &str = "trash";
/// View receiving batch progress and final reports.
const PROGRESS_VIEW: ViewHandle = ViewHandle(1);
/// View receiving diff and log output.
const QUERY_VIEW: ViewHandle = ViewHandle(2);

#[derive(Parser, Debug)]
#[command(name = "oxplug", version, about = "Install and update editor plugins")]
struct Args {
    /// Configuration file path (overrides discovery of `oxplug.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Cmd {
    /// Install or update every non-frozen plugin, or just NAME.
    Update { name: Option<String> },
    /// Run NAME again, keeping the rest of the last batch in the report.
    Retry { name: String },
    /// Install OWNER/REPO from GitHub.
    Install { repo: String },
    /// Move the plugin directory to the trash.
    Remove { name: String },
    /// Show changes pulled in by the last batch.
    Diff { name: String },
    /// Show the log of the last run for NAME.
    Log { name: String },
    /// Verify every configured plugin directory exists.
    Check,
}

impl Cmd {
    fn into_host_command(self) -> HostCommand {
        match self {
            Cmd::Update { name: None } => HostCommand::UpdateAll {
                view: PROGRESS_VIEW,
            },
            Cmd::Update { name: Some(name) } => HostCommand::Update {
                view: PROGRESS_VIEW,
                name,
            },
            Cmd::Retry { name } => HostCommand::Retry {
                view: PROGRESS_VIEW,
                name,
            },
            Cmd::Install { repo } => HostCommand::Install {
                view: PROGRESS_VIEW,
                repo,
            },
            Cmd::Remove { name } => HostCommand::Remove { name },
            Cmd::Diff { name } => HostCommand::Diff {
                view: QUERY_VIEW,
                name,
            },
            Cmd::Log { name } => HostCommand::ShowLog {
                view: QUERY_VIEW,
                name,
            },
            Cmd::Check => HostCommand::CheckIntegrity,
        }
    }
}

/// Commands that read revisions recorded by an earlier process.
fn needs_snapshot(command: &HostCommand) -> bool {
    matches!(
        command,
        HostCommand::Diff { .. } | HostCommand::Retry { .. }
    )
}

fn exit_code(result: &Result<DispatchOutcome, PlugError>) -> ExitCode {
    match result {
        Ok(DispatchOutcome::Batch(summary)) if summary.fail > 0 => ExitCode::from(1),
        Ok(DispatchOutcome::Checked { broken }) if *broken > 0 => ExitCode::from(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) if e.is_scheduler_fault() => ExitCode::from(2),
        Err(_) => ExitCode::from(1),
    }
}

fn configure_logging(dir: &Path) -> Result<Option<WorkerGuard>> {
    std::fs::create_dir_all(dir)?;
    let file_appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(_) => Ok(Some(guard)),
        // Global subscriber already installed; dropping the guard shuts the writer down.
        Err(_) => Ok(None),
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

/// `git --version` of the configured program, when the config did not pin one.
async fn detect_tool_version(settings: &Settings, runner: Arc<dyn Runner>) -> Option<String> {
    let git = Git::new(
        runner,
        GitOptions {
            program: settings.git.clone(),
            timeout: settings.timeout,
            shallow: false,
            rebase: false,
        },
    );
    match git.version().await {
        Ok(version) => Some(version),
        Err(e) => {
            warn!(target: "runtime", error = %e, "tool_version_unknown");
            None
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_from(args.config)?;
    let mut settings = config.settings;
    let _log_guard = configure_logging(&settings.state_dir)?;
    install_panic_hook();
    info!(
        target: "runtime.startup",
        config = ?config.path,
        plugins = config.plugins.len(),
        threads = settings.threads,
        "startup"
    );

    let runner: Arc<dyn Runner> = Arc::new(ProcessRunner::default());
    if settings.tool_version.is_none() {
        settings.tool_version = detect_tool_version(&settings, runner.clone()).await;
    }

    let host = Arc::new(TerminalHost::new());
    let logs = Arc::new(FileLogStore::new(&settings.log_dir));
    let snapshot_path = settings.state_dir.join(SNAPSHOT_FILE_NAME);
    let trash = TrashDir::new(settings.state_dir.join(TRASH_DIR_NAME));
    let orchestrator = Orchestrator::new(settings, config.plugins, runner, host.clone(), logs);

    let command = args.command.into_host_command();
    if needs_snapshot(&command) {
        match BatchSnapshot::load(&snapshot_path) {
            Ok(Some(snapshot)) => orchestrator.restore(snapshot),
            Ok(None) => {}
            Err(e) => warn!(target: "runtime", error = %format!("{e:#}"), "snapshot_unreadable"),
        }
    }

    let starts_batch = command.starts_batch();
    let result = dispatch(&orchestrator, &trash, command).await;
    host.finish();

    if starts_batch && result.is_ok() {
        if let Err(e) = orchestrator.snapshot().save(&snapshot_path) {
            warn!(target: "runtime", error = %format!("{e:#}"), "snapshot_save_failed");
        }
    }
    if let Err(e) = &result {
        if e.is_scheduler_fault() {
            error!(target: "runtime", error = %e, "scheduler_fault");
        }
    }
    Ok(exit_code(&result))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("oxplug: {e:#}");
            ExitCode::FAILURE
        }
    }
}
