use crate::{
    CommandSpec, LineSink, LineSplitter, PROCESS_EXIT_FAILURES, PROCESS_SPAWN_FAILURES,
    PROCESS_SPAWNS, PROCESS_TIMEOUTS, ProcessError, Runner,
};
use async_trait::async_trait;
use std::process::ExitStatus;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 4_096;
const DEFAULT_GRACE: Duration = Duration::from_millis(100);
/// Upper bound on waiting for a killed child to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Tokio-backed [`Runner`].
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// How long trailing output may keep draining after the child exits.
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_GRACE,
        }
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<tokio::process::Child, ProcessError> {
        match spec.command().spawn() {
            Ok(child) => {
                PROCESS_SPAWNS.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "process",
                    command = %spec,
                    cwd = %spec.cwd.display(),
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "process_spawned"
                );
                Ok(child)
            }
            Err(source) => {
                PROCESS_SPAWN_FAILURES.fetch_add(1, Ordering::Relaxed);
                warn!(target: "process", command = %spec, ?source, "process_spawn_failed");
                Err(ProcessError::Spawn {
                    program: spec.program.clone(),
                    source,
                })
            }
        }
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

fn exit_outcome(spec: &CommandSpec, status: ExitStatus) -> Result<(), ProcessError> {
    if status.success() {
        return Ok(());
    }
    PROCESS_EXIT_FAILURES.fetch_add(1, Ordering::Relaxed);
    debug!(target: "process", command = %spec, ?status, "process_exit_failure");
    match status.code() {
        Some(code) => Err(ProcessError::Exit { code }),
        None => Err(ProcessError::Signal),
    }
}

fn timeout_outcome(spec: &CommandSpec) -> ProcessError {
    PROCESS_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    warn!(
        target: "process",
        command = %spec,
        timeout_ms = spec.timeout.as_millis() as u64,
        "process_timeout"
    );
    ProcessError::Timeout {
        timeout: spec.timeout,
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn stream(&self, spec: &CommandSpec, on_line: &LineSink<'_>) -> Result<(), ProcessError> {
        let mut child = self.spawn(spec)?;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_lines = LineSplitter::new();
        let mut err_lines = LineSplitter::new();
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];

        // One timer serves three phases: the hard deadline, then (after a kill) the
        // reap bound, or (after a normal exit) the output drain window.
        let deadline = tokio::time::sleep(spec.timeout);
        tokio::pin!(deadline);
        let mut exit: Option<ExitStatus> = None;
        let mut timed_out = false;

        loop {
            if exit.is_some() && stdout.is_none() && stderr.is_none() {
                break;
            }
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                    Ok(0) => {
                        out_lines.finish(|l| on_line(l));
                        stdout = None;
                    }
                    Ok(n) => out_lines.feed(&out_buf[..n], |l| on_line(l)),
                    Err(e) => {
                        trace!(target: "process", ?e, "stdout_read_failed");
                        stdout = None;
                    }
                },
                read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                    Ok(0) => {
                        err_lines.finish(|l| on_line(l));
                        stderr = None;
                    }
                    Ok(n) => err_lines.feed(&err_buf[..n], |l| on_line(l)),
                    Err(e) => {
                        trace!(target: "process", ?e, "stderr_read_failed");
                        stderr = None;
                    }
                },
                status = child.wait(), if exit.is_none() => {
                    exit = Some(status?);
                    if timed_out {
                        break;
                    }
                    deadline.as_mut().reset(Instant::now() + self.grace);
                }
                _ = &mut deadline => {
                    if exit.is_some() || timed_out {
                        break;
                    }
                    timed_out = true;
                    if let Err(e) = child.start_kill() {
                        warn!(target: "process", command = %spec, ?e, "process_kill_failed");
                    }
                    deadline.as_mut().reset(Instant::now() + KILL_WAIT);
                }
            }
        }

        out_lines.finish(|l| on_line(l));
        err_lines.finish(|l| on_line(l));

        if timed_out {
            return Err(timeout_outcome(spec));
        }
        match exit {
            Some(status) => exit_outcome(spec, status),
            None => Err(timeout_outcome(spec)),
        }
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<String, ProcessError> {
        let child = self.spawn(spec)?;
        // Dropping the pending future on timeout kills the child (kill_on_drop).
        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Err(_) => Err(timeout_outcome(spec)),
            Ok(Err(e)) => Err(ProcessError::Io(e)),
            Ok(Ok(output)) => {
                if !output.stderr.is_empty() {
                    trace!(
                        target: "process",
                        command = %spec,
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "capture_stderr"
                    );
                }
                exit_outcome(spec, output.status)?;
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
        }
    }
}
