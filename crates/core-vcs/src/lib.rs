//! Version-control operations built on the process [`Runner`].
//!
//! Each operation is a strictly ordered sequence of invocations for one plugin
//! directory; every step either succeeds or ends the sequence with a
//! [`VcsError`]. Two steps are best-effort and never fail a sequence:
//! post-operation hooks (output is logged, failures are swallowed) and
//! submodule init/update.
//!
//! Streaming steps forward their output to the caller's log callback as it
//! arrives, in step order.

use core_config::{Plugin, Settings, log_key_for};
use core_process::{CommandSpec, LineSink, ProcessError, Runner, normalize_line};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod version;

pub use version::{AUTOSTASH_AFTER, parse_tool_version, rebase_supported};

pub const SUBMODULE_MANIFEST: &str = ".gitmodules";

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: ProcessError,
    },
    #[error("cannot determine branch of {}", .0.display())]
    Branch(PathBuf),
    #[error("cannot prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VcsError {
    fn step(step: &'static str) -> impl FnOnce(ProcessError) -> VcsError {
        move |source| VcsError::Step { step, source }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, VcsError::Step { source, .. } if source.is_timeout())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmoduleMode {
    Init,
    Update,
}

impl fmt::Display for SubmoduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmoduleMode::Init => "init",
            SubmoduleMode::Update => "update",
        })
    }
}

/// Result of a completed clone or pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Revision before the operation; `None` for a fresh clone.
    pub from: Option<String>,
    pub to: String,
    pub branch: String,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        self.from.as_deref() != Some(self.to.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOptions {
    pub program: String,
    pub timeout: Duration,
    /// Shallow clones with shallow submodules.
    pub shallow: bool,
    /// Pull with `--rebase --autostash`. Already gated on the tool version.
    pub rebase: bool,
}

impl GitOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let supported = settings
            .tool_version
            .as_deref()
            .is_some_and(rebase_supported);
        if settings.rebase && !supported {
            info!(
                target: "vcs",
                version = settings.tool_version.as_deref(),
                "rebase_disabled_by_tool_version"
            );
        }
        Self {
            program: settings.git.clone(),
            timeout: settings.timeout,
            shallow: settings.shadow,
            rebase: settings.rebase && supported,
        }
    }
}

#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn Runner>,
    opts: GitOptions,
}

impl fmt::Debug for Git {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Git").field("opts", &self.opts).finish()
    }
}

impl Git {
    pub fn new(runner: Arc<dyn Runner>, opts: GitOptions) -> Self {
        Self { runner, opts }
    }

    pub fn options(&self) -> &GitOptions {
        &self.opts
    }

    fn spec<I, S>(&self, cwd: &Path, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.opts.program, cwd, self.opts.timeout).args(args)
    }

    pub fn clone_args(&self, remote: &str, target: &str) -> Vec<String> {
        let mut args: Vec<String> = ["clone", remote, target, "--progress", "--recursive"]
            .into_iter()
            .map(String::from)
            .collect();
        if self.opts.shallow {
            args.push("--depth=1".into());
            args.push("--shallow-submodules".into());
        }
        args
    }

    pub fn pull_args(&self, remote: &str) -> Vec<String> {
        let mut args: Vec<String> = ["pull", remote, "--progress", "--stat"]
            .into_iter()
            .map(String::from)
            .collect();
        if self.opts.rebase {
            args.push("--rebase".into());
            args.push("--autostash".into());
        }
        args
    }

    /// Resolved head identifier, or an empty string when there is none.
    pub async fn current_revision(&self, dir: &Path) -> String {
        let spec = self.spec(dir, ["rev-parse", "--verify", "HEAD"]);
        match self.runner.capture(&spec).await {
            Ok(out) => out.trim_end_matches(['\r', '\n']).to_string(),
            Err(e) => {
                debug!(target: "vcs", dir = %dir.display(), ?e, "revision_unresolved");
                String::new()
            }
        }
    }

    /// Symbolic branch name, or a short revision when detached.
    pub async fn current_branch(&self, dir: &Path) -> Result<String, VcsError> {
        let symbolic = self.spec(dir, ["symbolic-ref", "-q", "HEAD"]);
        match self.runner.capture(&symbolic).await {
            Ok(out) => {
                let full = out.trim_end();
                let name = full.strip_prefix("refs/heads/").unwrap_or(full);
                if !name.is_empty() {
                    return Ok(name.to_string());
                }
            }
            Err(e) => debug!(target: "vcs", dir = %dir.display(), ?e, "head_detached"),
        }
        let short = self.spec(dir, ["rev-parse", "--short", "HEAD"]);
        match self.runner.capture(&short).await {
            Ok(out) if !out.trim().is_empty() => Ok(out.trim().to_string()),
            _ => Err(VcsError::Branch(dir.to_path_buf())),
        }
    }

    /// Run a shell command in `dir`. Returns its standard output with the trailing
    /// line ending normalized to a single `\n`, or an empty string on failure.
    pub async fn run_hook(&self, command: &str, dir: &Path) -> String {
        let spec = CommandSpec::shell(command, dir, self.opts.timeout);
        match self.runner.capture(&spec).await {
            Ok(out) => {
                let body = out.trim_end_matches(['\r', '\n']);
                if body.is_empty() {
                    String::new()
                } else {
                    format!("{body}\n")
                }
            }
            Err(e) => {
                warn!(target: "vcs", command, dir = %dir.display(), ?e, "hook_failed");
                String::new()
            }
        }
    }

    async fn hook_into_log(&self, command: &str, dir: &Path, log: &LineSink<'_>) {
        log(&format!("Run command: {command}"));
        let out = self.run_hook(command, dir).await;
        for line in out.lines().filter_map(normalize_line) {
            log(line);
        }
    }

    /// Clone `plugin` into its directory, then hook, checkout, revision + branch
    /// resolution and submodule init, in that order.
    pub async fn clone(&self, plugin: &Plugin, log: &LineSink<'_>) -> Result<SyncOutcome, VcsError> {
        let dir = plugin.directory.as_path();
        let cwd = dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(cwd)
            .await
            .map_err(|source| VcsError::Io {
                path: cwd.to_path_buf(),
                source,
            })?;

        let target = log_key_for(dir);
        let spec = self.spec(cwd, self.clone_args(&plugin.remote, &target));
        log(&format!("cd {}", cwd.display()));
        log(&spec.to_string());
        self.runner
            .stream(&spec, log)
            .await
            .map_err(VcsError::step("clone"))?;

        if let Some(hook) = plugin.hook.as_deref() {
            self.hook_into_log(hook, dir, log).await;
        }
        if let Some(dest) = plugin.dest.as_deref() {
            log(&format!("Checkout: {dest}"));
            self.runner
                .stream(&self.spec(dir, ["checkout", dest]), log)
                .await
                .map_err(VcsError::step("checkout"))?;
        }

        let to = self.current_revision(dir).await;
        let branch = self.current_branch(dir).await?;
        self.update_submodules(dir, SubmoduleMode::Init, log).await;
        debug!(target: "vcs", plugin = %plugin.name, to = %to, branch = %branch, "clone_complete");
        Ok(SyncOutcome {
            from: None,
            to,
            branch,
        })
    }

    /// Pull `plugin`, then checkout, revision + branch resolution, submodule
    /// update, and the hook only when the revision moved.
    pub async fn pull(&self, plugin: &Plugin, log: &LineSink<'_>) -> Result<SyncOutcome, VcsError> {
        let dir = plugin.directory.as_path();
        let from = self.current_revision(dir).await;

        let spec = self.spec(dir, self.pull_args(&plugin.remote));
        log(&format!("cd {}", dir.display()));
        log(&spec.to_string());
        self.runner
            .stream(&spec, log)
            .await
            .map_err(VcsError::step("pull"))?;

        if let Some(dest) = plugin.dest.as_deref() {
            log(&format!("Checkout: {dest}"));
            self.runner
                .stream(&self.spec(dir, ["checkout", dest]), log)
                .await
                .map_err(VcsError::step("checkout"))?;
        }

        let to = self.current_revision(dir).await;
        let branch = self.current_branch(dir).await?;
        self.update_submodules(dir, SubmoduleMode::Update, log).await;

        if let Some(hook) = plugin.hook.as_deref() {
            if from != to {
                self.hook_into_log(hook, dir, log).await;
            } else {
                debug!(target: "vcs", plugin = %plugin.name, "hook_skipped_unchanged");
            }
        }
        debug!(target: "vcs", plugin = %plugin.name, from = %from, to = %to, "pull_complete");
        Ok(SyncOutcome {
            from: Some(from),
            to,
            branch,
        })
    }

    /// Best-effort submodule step; a no-op without a submodule manifest.
    pub async fn update_submodules(&self, dir: &Path, mode: SubmoduleMode, log: &LineSink<'_>) {
        let manifest = dir.join(SUBMODULE_MANIFEST);
        if !tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
            return;
        }
        let spec = self.spec(dir, ["submodule".to_string(), mode.to_string()]);
        if let Err(e) = self.runner.stream(&spec, log).await {
            warn!(target: "vcs", dir = %dir.display(), %mode, ?e, "submodule_failed");
        }
    }

    /// Full diff text between two revisions.
    pub async fn diff(&self, dir: &Path, from: &str, to: &str) -> Result<String, VcsError> {
        let spec = self.spec(dir, ["--no-pager", "diff", "--no-color", from, to]);
        self.runner
            .capture(&spec)
            .await
            .map_err(VcsError::step("diff"))
    }

    /// Installed tool version (`git --version` with the prefix removed).
    pub async fn version(&self) -> Result<String, VcsError> {
        let spec = self.spec(Path::new("."), ["--version"]);
        let out = self
            .runner
            .capture(&spec)
            .await
            .map_err(VcsError::step("version"))?;
        let trimmed = out.trim();
        Ok(trimmed
            .strip_prefix("git version")
            .unwrap_or(trimmed)
            .trim()
            .to_string())
    }
}
