//! Scripted [`Runner`] for tests: answers each invocation from a closure and
//! records every [`CommandSpec`] it was asked to run.
//!
//! A scripted delay longer than the invocation's timeout resolves to
//! [`ProcessError::Timeout`] after the timeout elapses, mirroring the real runner.

use crate::{CommandSpec, LineSink, ProcessError, Runner};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Canned response for one invocation.
#[derive(Debug)]
pub struct Scripted {
    pub lines: Vec<String>,
    pub stdout: String,
    pub delay: Duration,
    pub outcome: Result<(), ProcessError>,
}

impl Scripted {
    pub fn ok() -> Self {
        Self {
            lines: Vec::new(),
            stdout: String::new(),
            delay: Duration::ZERO,
            outcome: Ok(()),
        }
    }

    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            ..Self::ok()
        }
    }

    pub fn fail(err: ProcessError) -> Self {
        Self {
            outcome: Err(err),
            ..Self::ok()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self::fail(ProcessError::Exit { code })
    }

    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Script = dyn Fn(&CommandSpec) -> Scripted + Send + Sync;

pub struct ScriptedRunner {
    script: Box<Script>,
    calls: Mutex<Vec<CommandSpec>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CommandSpec) -> Scripted + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every invocation so far, in call order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Rendered command lines (`program arg ...`) of every invocation so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }

    /// Highest number of simultaneously running invocations observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn play(&self, spec: &CommandSpec) -> Scripted {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut scripted = (self.script)(spec);
        if scripted.delay > spec.timeout {
            tokio::time::sleep(spec.timeout).await;
            scripted.lines.clear();
            scripted.outcome = Err(ProcessError::Timeout {
                timeout: spec.timeout,
            });
        } else if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn stream(&self, spec: &CommandSpec, on_line: &LineSink<'_>) -> Result<(), ProcessError> {
        let scripted = self.play(spec).await;
        for line in &scripted.lines {
            if let Some(line) = crate::normalize_line(line) {
                on_line(line);
            }
        }
        scripted.outcome
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<String, ProcessError> {
        let scripted = self.play(spec).await;
        scripted.outcome.map(|_| scripted.stdout)
    }
}
