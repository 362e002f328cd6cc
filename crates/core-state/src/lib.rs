//! Per-plugin status and log model for one batch.
//!
//! [`BatchState`] is owned by the orchestrator and written by a single logical
//! owner (the batch driver); everything else reads snapshots. Entries are keyed
//! by plugin directory and ordered by it, which is also the order reports list
//! them in.
//!
//! Lifecycle of a [`PluginStatus`]: created by [`BatchState::begin`] when its job
//! starts, mutated only on behalf of that job, never removed until the next
//! batch calls [`BatchState::reset`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod logs;
mod snapshot;

pub use logs::{FileLogStore, LogStore, MemoryLogStore};
pub use snapshot::{BatchSnapshot, SNAPSHOT_FILE_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Installing,
    Updating,
    Success,
    Fail,
}

impl Phase {
    pub fn is_finished(self) -> bool {
        matches!(self, Phase::Success | Phase::Fail)
    }

    /// Prefix glyph for the per-plugin report line.
    pub fn glyph(self) -> char {
        match self {
            Phase::Installing => '+',
            Phase::Updating => '*',
            Phase::Success => '✓',
            Phase::Fail => '✗',
        }
    }

    /// Single-character marker for the condensed progress strip.
    pub fn marker(self) -> char {
        match self {
            Phase::Installing => '+',
            Phase::Updating => '=',
            Phase::Success => 'o',
            Phase::Fail => 'x',
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl Revisions {
    /// `to` is only ever set once the clone / pull step completed.
    pub fn is_complete(&self) -> bool {
        self.to.is_some()
    }

    /// First install, or a revision that moved.
    pub fn changed(&self) -> bool {
        self.from.is_none() || self.from != self.to
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub revisions: Revisions,
    pub phase: Phase,
    pub branch: Option<String>,
}

impl PluginStatus {
    pub fn new(phase: Phase) -> Self {
        Self {
            revisions: Revisions::default(),
            phase,
            branch: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub finished: usize,
    pub success: usize,
    pub fail: usize,
}

#[derive(Debug, Default, Clone)]
pub struct BatchState {
    pub updating: bool,
    /// Denominator for progress.
    pub total: usize,
    /// Captured once when the batch completes.
    pub elapsed: Option<Duration>,
    statuses: BTreeMap<PathBuf, PluginStatus>,
    logs: BTreeMap<PathBuf, Vec<String>>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh batch covering `total` plugins.
    pub fn reset(&mut self, total: usize) {
        self.statuses.clear();
        self.logs.clear();
        self.total = total;
        self.elapsed = None;
    }

    /// Create (or, for a retry, replace) the status entry of a starting job.
    pub fn begin(&mut self, dir: &Path, phase: Phase) {
        self.statuses
            .insert(dir.to_path_buf(), PluginStatus::new(phase));
    }

    pub fn set_phase(&mut self, dir: &Path, phase: Phase) {
        if let Some(status) = self.statuses.get_mut(dir) {
            status.phase = phase;
        }
    }

    pub fn record_sync(&mut self, dir: &Path, revisions: Revisions, branch: Option<String>) {
        if let Some(status) = self.statuses.get_mut(dir) {
            status.revisions = revisions;
            status.branch = branch;
        }
    }

    /// Append a captured line; blank lines are discarded. Returns whether the
    /// line was kept.
    pub fn append_log(&mut self, dir: &Path, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        self.logs
            .entry(dir.to_path_buf())
            .or_default()
            .push(line.to_string());
        true
    }

    pub fn status(&self, dir: &Path) -> Option<&PluginStatus> {
        self.statuses.get(dir)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&Path, &PluginStatus)> {
        self.statuses.iter().map(|(k, v)| (k.as_path(), v))
    }

    pub fn log(&self, dir: &Path) -> &[String] {
        self.logs.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_log(&self, dir: &Path) -> Option<&str> {
        self.log(dir).last().map(String::as_str)
    }

    pub fn counts(&self) -> BatchCounts {
        self.statuses
            .values()
            .fold(BatchCounts::default(), |mut acc, status| {
                match status.phase {
                    Phase::Success => {
                        acc.finished += 1;
                        acc.success += 1;
                    }
                    Phase::Fail => {
                        acc.finished += 1;
                        acc.fail += 1;
                    }
                    Phase::Installing | Phase::Updating => {}
                }
                acc
            })
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            total: self.total,
            elapsed_ms: self.elapsed.map(|d| d.as_millis() as u64),
            statuses: self.statuses.clone(),
        }
    }

    /// Restore statuses recorded by an earlier process. Logs are not part of a
    /// snapshot; they live in the persisted log store.
    pub fn restore(&mut self, snapshot: BatchSnapshot) {
        self.total = snapshot.total;
        self.elapsed = snapshot.elapsed_ms.map(Duration::from_millis);
        self.statuses = snapshot.statuses;
        self.logs.clear();
    }
}
