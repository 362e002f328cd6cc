//! External process execution with line-oriented output capture.
//!
//! [`ProcessRunner`] spawns one command, feeds standard output and standard
//! error through the same line callback as chunks arrive (so interleaving is
//! preserved for log coherence), and enforces a hard timeout: on expiry the
//! child is killed and the run resolves to [`ProcessError::Timeout`]. A run
//! that exits before the deadline cancels it.
//!
//! The [`Runner`] trait is the seam higher layers depend on; tests substitute a
//! scripted implementation (feature `test-support`).
//!
//! Invariants:
//! * Every invocation owns its child, buffers and timer; nothing is shared
//!   across invocations apart from the relaxed telemetry counters below.
//! * The line callback never receives blank lines, and a line containing
//!   carriage returns is reduced to its final segment (progress bars).

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

mod lines;
mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;

pub use lines::{LineSplitter, normalize_line};
pub use runner::ProcessRunner;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Relaxed counters; inspected by tests and logged at batch end.
pub static PROCESS_SPAWNS: AtomicU64 = AtomicU64::new(0);
pub static PROCESS_SPAWN_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static PROCESS_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
pub static PROCESS_EXIT_FAILURES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessTelemetry {
    pub spawns: u64,
    pub spawn_failures: u64,
    pub timeouts: u64,
    pub exit_failures: u64,
}

pub fn telemetry() -> ProcessTelemetry {
    ProcessTelemetry {
        spawns: PROCESS_SPAWNS.load(Ordering::Relaxed),
        spawn_failures: PROCESS_SPAWN_FAILURES.load(Ordering::Relaxed),
        timeouts: PROCESS_TIMEOUTS.load(Ordering::Relaxed),
        exit_failures: PROCESS_EXIT_FAILURES.load(Ordering::Relaxed),
    }
}

/// Callback receiving normalized output lines.
pub type LineSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process exit with {code}")]
    Exit { code: i32 },
    #[error("process terminated by signal")]
    Signal,
    #[error("process timeout after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("process i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { code } => Some(*code),
            _ => None,
        }
    }
}

/// Fully described invocation: program, arguments, working directory and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// Run `command` through the platform shell.
    pub fn shell(command: &str, cwd: impl AsRef<Path>, timeout: Duration) -> Self {
        if cfg!(windows) {
            Self::new("cmd", cwd, timeout).args(["/C", command])
        } else {
            Self::new("sh", cwd, timeout).args(["-c", command])
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// True when the first argument equals `subcommand` (e.g. `"clone"`).
    pub fn is_subcommand(&self, subcommand: &str) -> bool {
        self.args.first().map(String::as_str) == Some(subcommand)
    }

    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Executes external commands. Implementations must be safe to call from many
/// concurrent jobs.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run to completion, delivering combined output lines to `on_line`.
    async fn stream(&self, spec: &CommandSpec, on_line: &LineSink<'_>) -> Result<(), ProcessError>;

    /// Run to completion and return standard output (non-streaming).
    async fn capture(&self, spec: &CommandSpec) -> Result<String, ProcessError>;
}
