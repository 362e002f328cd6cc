//! Host-facing contract for oxplug.
//!
//! The orchestrator never reads UI state back: it pushes whole reports into a
//! view target identified by a [`ViewHandle`], surfaces errors and notices, and
//! asks the host to run its own registration steps (help tags, remote plugin
//! manifests). Every method on [`HostSink`] is fire-and-forget; implementors
//! log their own failures instead of returning them.
//!
//! [`HostCommand`] is the command surface the host (editor binding or CLI)
//! translates its input into before handing it to the dispatcher.

use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Interval between progress pushes while a batch is in flight.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Opaque identifier of a host buffer / view target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ViewHandle(pub u64);

impl fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Narrow write-only interface the orchestrator uses to talk to its host.
pub trait HostSink: Send + Sync {
    /// Replace the full contents of `target` with `lines`.
    fn push_lines(&self, target: ViewHandle, lines: Vec<String>);
    /// Surface a user-visible error.
    fn report_error(&self, message: &str);
    /// Surface a user-visible informational message.
    fn notify(&self, message: &str);
    /// Mirror of the orchestrator's `updating` flag.
    fn updating_changed(&self, _updating: bool) {}
    /// Regenerate help tags for a plugin documentation directory.
    fn generate_helptags(&self, _doc_dir: &Path) {}
    /// Re-register remote plugins once after a batch touched a remote-capable plugin.
    fn refresh_remote_plugins(&self) {}
}

impl<T: HostSink + ?Sized> HostSink for std::sync::Arc<T> {
    fn push_lines(&self, target: ViewHandle, lines: Vec<String>) {
        (**self).push_lines(target, lines)
    }
    fn report_error(&self, message: &str) {
        (**self).report_error(message)
    }
    fn notify(&self, message: &str) {
        (**self).notify(message)
    }
    fn updating_changed(&self, updating: bool) {
        (**self).updating_changed(updating)
    }
    fn generate_helptags(&self, doc_dir: &Path) {
        (**self).generate_helptags(doc_dir)
    }
    fn refresh_remote_plugins(&self) {
        (**self).refresh_remote_plugins()
    }
}

/// Commands a host can issue. Batch-starting commands carry the view that
/// receives progress; query commands carry the view that receives their output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    UpdateAll { view: ViewHandle },
    Update { view: ViewHandle, name: String },
    Retry { view: ViewHandle, name: String },
    Install { view: ViewHandle, repo: String },
    Remove { name: String },
    Diff { view: ViewHandle, name: String },
    ShowLog { view: ViewHandle, name: String },
    CheckIntegrity,
}

impl HostCommand {
    /// Stable identifier used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HostCommand::UpdateAll { .. } => "update_all",
            HostCommand::Update { .. } => "update",
            HostCommand::Retry { .. } => "retry",
            HostCommand::Install { .. } => "install",
            HostCommand::Remove { .. } => "remove",
            HostCommand::Diff { .. } => "diff",
            HostCommand::ShowLog { .. } => "show_log",
            HostCommand::CheckIntegrity => "check_integrity",
        }
    }

    /// Whether the command starts a batch (and is therefore gated by `updating`).
    pub fn starts_batch(&self) -> bool {
        matches!(
            self,
            HostCommand::UpdateAll { .. }
                | HostCommand::Update { .. }
                | HostCommand::Retry { .. }
                | HostCommand::Install { .. }
        )
    }
}

/// Sink that only logs; used when no host is attached.
pub struct TracingHost;

impl HostSink for TracingHost {
    fn push_lines(&self, target: ViewHandle, lines: Vec<String>) {
        tracing::debug!(target: "host", %target, lines = lines.len(), "push_lines");
    }
    fn report_error(&self, message: &str) {
        tracing::error!(target: "host", message, "report_error");
    }
    fn notify(&self, message: &str) {
        tracing::info!(target: "host", message, "notify");
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod recording {
    //! In-memory [`HostSink`] that records every call for assertions.

    use super::{HostSink, ViewHandle};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum HostRecord {
        Lines(ViewHandle, Vec<String>),
        Error(String),
        Notice(String),
        Updating(bool),
        Helptags(PathBuf),
        RefreshRemote,
    }

    #[derive(Default)]
    pub struct RecordingHost {
        records: Mutex<Vec<HostRecord>>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self::default()
        }

        fn push(&self, record: HostRecord) {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record);
        }

        pub fn records(&self) -> Vec<HostRecord> {
            self.records
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        pub fn errors(&self) -> Vec<String> {
            self.records()
                .into_iter()
                .filter_map(|r| match r {
                    HostRecord::Error(m) => Some(m),
                    _ => None,
                })
                .collect()
        }

        pub fn notices(&self) -> Vec<String> {
            self.records()
                .into_iter()
                .filter_map(|r| match r {
                    HostRecord::Notice(m) => Some(m),
                    _ => None,
                })
                .collect()
        }

        /// Every push made to `view`, oldest first.
        pub fn pushes(&self, view: ViewHandle) -> Vec<Vec<String>> {
            self.records()
                .into_iter()
                .filter_map(|r| match r {
                    HostRecord::Lines(v, lines) if v == view => Some(lines),
                    _ => None,
                })
                .collect()
        }

        pub fn last_push(&self, view: ViewHandle) -> Option<Vec<String>> {
            self.pushes(view).pop()
        }

        pub fn updating_transitions(&self) -> Vec<bool> {
            self.records()
                .into_iter()
                .filter_map(|r| match r {
                    HostRecord::Updating(u) => Some(u),
                    _ => None,
                })
                .collect()
        }

        pub fn count(&self, record: &HostRecord) -> usize {
            self.records().iter().filter(|r| *r == record).count()
        }
    }

    impl HostSink for RecordingHost {
        fn push_lines(&self, target: ViewHandle, lines: Vec<String>) {
            self.push(HostRecord::Lines(target, lines));
        }
        fn report_error(&self, message: &str) {
            self.push(HostRecord::Error(message.to_string()));
        }
        fn notify(&self, message: &str) {
            self.push(HostRecord::Notice(message.to_string()));
        }
        fn updating_changed(&self, updating: bool) {
            self.push(HostRecord::Updating(updating));
        }
        fn generate_helptags(&self, doc_dir: &Path) {
            self.push(HostRecord::Helptags(doc_dir.to_path_buf()));
        }
        fn refresh_remote_plugins(&self) {
            self.push(HostRecord::RefreshRemote);
        }
    }
}
