//! Routes a [`HostCommand`] to the orchestrator entry point that handles it.

use crate::{BatchSummary, Orchestrator, PlugError, Trash};
use core_events::HostCommand;
use std::path::PathBuf;
use tracing::{debug, info};

/// What a dispatched command produced, for callers that need more than the
/// host-side effects (the binary uses it to pick an exit status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Batch(BatchSummary),
    Removed(PathBuf),
    Checked { broken: usize },
    Shown,
}

pub async fn dispatch(
    orchestrator: &Orchestrator,
    trash: &dyn Trash,
    command: HostCommand,
) -> Result<DispatchOutcome, PlugError> {
    let kind = command.kind();
    info!(target: "dispatch", kind, "command");
    let result = match command {
        HostCommand::UpdateAll { view } => orchestrator
            .update_all(view)
            .await
            .map(DispatchOutcome::Batch),
        HostCommand::Update { view, name } => orchestrator
            .update(view, &name, false)
            .await
            .map(DispatchOutcome::Batch),
        HostCommand::Retry { view, name } => orchestrator
            .update(view, &name, true)
            .await
            .map(DispatchOutcome::Batch),
        HostCommand::Install { view, repo } => orchestrator
            .install(view, &repo)
            .await
            .map(DispatchOutcome::Batch),
        HostCommand::Remove { name } => orchestrator
            .remove(&name, trash)
            .map(DispatchOutcome::Removed),
        HostCommand::Diff { view, name } => orchestrator
            .diff(view, &name)
            .await
            .map(|_| DispatchOutcome::Shown),
        HostCommand::ShowLog { view, name } => orchestrator
            .show_log(view, &name)
            .map(|_| DispatchOutcome::Shown),
        HostCommand::CheckIntegrity => {
            let broken = orchestrator.check_integrity().await.len();
            Ok(DispatchOutcome::Checked { broken })
        }
    };
    if let Err(e) = &result {
        // Already surfaced to the host by the orchestrator.
        debug!(target: "dispatch", kind, error = %e, "command_failed");
    }
    result
}
