use std::io;

/// Errors surfaced by orchestrator entry points. Per-plugin failures never
/// appear here; they end as a failed phase in the batch state.
#[derive(Debug, thiserror::Error)]
pub enum PlugError {
    #[error("Plugin update in process")]
    Busy,
    #[error("Plugin {0} not found")]
    NotFound(String),
    #[error("Invalid repository {0}, expected owner/repo")]
    InvalidRepo(String),
    /// The job queue itself failed. Jobs catch their own failures, so this is a
    /// broken invariant and is escalated by the caller.
    #[error("scheduler fault: {0}")]
    Scheduler(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PlugError {
    pub fn is_scheduler_fault(&self) -> bool {
        matches!(self, PlugError::Scheduler(_))
    }
}
