//! Job orchestration for oxplug.
//!
//! * [`queue`]: bounded-concurrency fan-out that always runs every job.
//! * [`Orchestrator`]: batch coordinator (update-all, single update and
//!   retry, install, diff, log, remove, integrity check).
//! * [`dispatch`]: maps host commands onto orchestrator calls.
//! * [`Trash`]: removal collaborator, with a directory-backed implementation.

mod dispatcher;
mod error;
mod orchestrator;
pub mod queue;
mod trash;

pub use dispatcher::{DispatchOutcome, dispatch};
pub use error::PlugError;
pub use orchestrator::{
    BatchSummary, DOC_DIR, INSTALL_DEST, Orchestrator, REMOTE_MANIFEST_DIR,
};
pub use queue::run_bounded;
pub use trash::{Trash, TrashDir};
