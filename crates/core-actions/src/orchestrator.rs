//! Batch orchestration: one job per plugin, run through the bounded queue.
//!
//! State ownership: jobs never touch [`BatchState`]. Each job reports what
//! happens to its plugin as [`JobEvent`]s over a channel, and the batch driver
//! (the task awaiting `run_batch`) is the only writer of the state and of the
//! persisted logs. The mutex around the state exists so queries (`diff`,
//! `report`, snapshots) can read it between batches or mid-flight.
//!
//! The driver multiplexes three sources with `select!`: job events, the queue
//! future and a progress ticker pushing the rendered report to the host.

use crate::queue::run_bounded;
use crate::trash::Trash;
use crate::PlugError;
use core_config::{Plugin, Settings, log_key_for};
use core_events::{HostSink, PROGRESS_INTERVAL, ViewHandle};
use core_process::Runner;
use core_render::{SHORT_REV, render_report};
use core_state::{BatchSnapshot, BatchState, LogStore, Phase, PluginStatus, Revisions};
use core_vcs::{Git, GitOptions};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Directory whose presence marks a plugin as remote-capable.
pub const REMOTE_MANIFEST_DIR: &str = "rplugin";
/// Documentation directory help tags are generated for.
pub const DOC_DIR: &str = "doc";
/// Ref checked out for plugins added through `install`.
pub const INSTALL_DEST: &str = "master";

#[derive(Debug)]
enum JobEvent {
    Started { dir: PathBuf, phase: Phase },
    Line { dir: PathBuf, line: String },
    Synced { dir: PathBuf, revisions: Revisions, branch: Option<String> },
    Finished { dir: PathBuf, phase: Phase },
}

/// Counts of a completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub fail: usize,
    pub elapsed: Duration,
}

pub struct Orchestrator {
    settings: Settings,
    plugins: Mutex<Vec<Plugin>>,
    git: Git,
    host: Arc<dyn HostSink>,
    logs: Arc<dyn LogStore>,
    state: Mutex<BatchState>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        plugins: Vec<Plugin>,
        runner: Arc<dyn Runner>,
        host: Arc<dyn HostSink>,
        logs: Arc<dyn LogStore>,
    ) -> Self {
        let git = Git::new(runner, GitOptions::from_settings(&settings));
        Self {
            settings,
            plugins: Mutex::new(plugins),
            git,
            host,
            logs,
            state: Mutex::new(BatchState::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn plugin_list(&self) -> MutexGuard<'_, Vec<Plugin>> {
        self.plugins.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn plugins(&self) -> Vec<Plugin> {
        self.plugin_list().clone()
    }

    fn find(&self, name: &str) -> Option<Plugin> {
        self.plugin_list().iter().find(|p| p.name == name).cloned()
    }

    /// Read access to the batch state.
    pub fn with_state<R>(&self, f: impl FnOnce(&BatchState) -> R) -> R {
        f(&self.state())
    }

    pub fn is_updating(&self) -> bool {
        self.state().updating
    }

    /// Change the `updating` flag and mirror it to the host.
    pub fn set_updating(&self, updating: bool) {
        self.state().updating = updating;
        self.host.updating_changed(updating);
    }

    /// Status of the named plugin in the current (or restored) batch.
    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        let plugin = self.find(name)?;
        self.state().status(&plugin.directory).cloned()
    }

    pub fn report(&self) -> Vec<String> {
        render_report(&self.state())
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.state().snapshot()
    }

    /// Load statuses recorded by an earlier process. Ignored while a batch runs.
    pub fn restore(&self, snapshot: BatchSnapshot) {
        let mut state = self.state();
        if state.updating {
            warn!(target: "batch", "restore_skipped_busy");
            return;
        }
        state.restore(snapshot);
    }

    fn reject(&self, err: PlugError) -> PlugError {
        warn!(target: "batch", error = %err, "request_rejected");
        self.host.report_error(&err.to_string());
        err
    }

    /// Update every non-frozen plugin.
    pub async fn update_all(&self, view: ViewHandle) -> Result<BatchSummary, PlugError> {
        let plugins = {
            let mut state = self.state();
            if state.updating {
                drop(state);
                return Err(self.reject(PlugError::Busy));
            }
            let mut plugins: Vec<Plugin> = self
                .plugin_list()
                .iter()
                .filter(|p| !p.frozen)
                .cloned()
                .collect();
            plugins.sort_by(|a, b| a.name.cmp(&b.name));
            state.reset(plugins.len());
            state.updating = true;
            plugins
        };
        self.host.updating_changed(true);
        info!(target: "batch", %view, total = plugins.len(), threads = self.settings.threads, "batch_start");
        self.run_batch(view, &plugins).await
    }

    /// Update a single plugin. A retry keeps the other entries of the previous
    /// batch so the report still shows them.
    pub async fn update(
        &self,
        view: ViewHandle,
        name: &str,
        is_retry: bool,
    ) -> Result<BatchSummary, PlugError> {
        let plugin = {
            let mut state = self.state();
            if state.updating {
                drop(state);
                return Err(self.reject(PlugError::Busy));
            }
            let Some(plugin) = self.find(name) else {
                drop(state);
                return Err(self.reject(PlugError::NotFound(name.to_string())));
            };
            if !is_retry {
                state.reset(1);
            } else if state.total == 0 {
                state.total = 1;
            }
            state.updating = true;
            plugin
        };
        self.host.updating_changed(true);
        info!(target: "batch", %view, plugin = %plugin.name, is_retry, "single_start");
        let summary = self.run_batch(view, std::slice::from_ref(&plugin)).await?;

        let failed = {
            let state = self.state();
            match state.status(&plugin.directory) {
                Some(status) if status.phase == Phase::Fail => {
                    Some(state.last_log(&plugin.directory).unwrap_or("").to_string())
                }
                _ => None,
            }
        };
        if let Some(last) = failed {
            self.host
                .report_error(&format!("Update error on {}: {last}", plugin.name));
        }
        Ok(summary)
    }

    /// Install `owner/repo` from GitHub into the bundle directory. The working
    /// plugin list is replaced by the new entry.
    pub async fn install(&self, view: ViewHandle, repo: &str) -> Result<BatchSummary, PlugError> {
        if self.is_updating() {
            return Err(self.reject(PlugError::Busy));
        }
        let plugin = self.plugin_for_repo(repo).map_err(|e| self.reject(e))?;
        let name = plugin.name.clone();
        *self.plugin_list() = vec![plugin];
        self.update(view, &name, false).await
    }

    pub fn plugin_for_repo(&self, repo: &str) -> Result<Plugin, PlugError> {
        let repo = repo.trim().trim_end_matches('/');
        let name = match repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                name
            }
            _ => return Err(PlugError::InvalidRepo(repo.to_string())),
        };
        Ok(Plugin {
            name: name.to_string(),
            directory: self.settings.bundle_dir.join(name),
            remote: format!("https://github.com/{repo}.git"),
            dest: Some(INSTALL_DEST.to_string()),
            hook: None,
            frozen: false,
        })
    }

    async fn run_batch(
        &self,
        view: ViewHandle,
        plugins: &[Plugin],
    ) -> Result<BatchSummary, PlugError> {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let jobs: Vec<_> = plugins
            .iter()
            .map(|plugin| {
                AssertUnwindSafe(self.run_job(plugin, tx.clone()))
                    .catch_unwind()
                    .map(move |settled| {
                        settled.unwrap_or_else(|payload| Err(job_panicked(plugin, payload.as_ref())))
                    })
            })
            .collect();
        drop(tx);

        let queue = run_bounded(jobs, self.settings.threads.max(1));
        tokio::pin!(queue);
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => self.apply(event),
                res = &mut queue => break res,
                _ = ticker.tick() => self.push_report(view),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.apply(event);
        }

        let elapsed = started.elapsed();
        let summary = {
            let mut state = self.state();
            if outcome.is_err() {
                // A job that died mid-flight never sent `Finished`.
                let stuck: Vec<PathBuf> = state
                    .statuses()
                    .filter(|(_, s)| !s.phase.is_finished())
                    .map(|(dir, _)| dir.to_path_buf())
                    .collect();
                for dir in stuck {
                    state.set_phase(&dir, Phase::Fail);
                }
            }
            state.elapsed = Some(elapsed);
            state.updating = false;
            let counts = state.counts();
            BatchSummary {
                total: state.total,
                success: counts.success,
                fail: counts.fail,
                elapsed,
            }
        };
        self.host.updating_changed(false);
        self.push_report(view);

        if let Err(e) = outcome {
            error!(target: "batch", error = %e, "queue_failed");
            self.host.report_error(&e.to_string());
            return Err(e);
        }

        let t = core_process::telemetry();
        info!(
            target: "batch",
            total = summary.total,
            success = summary.success,
            fail = summary.fail,
            elapsed_ms = elapsed.as_millis() as u64,
            spawns = t.spawns,
            timeouts = t.timeouts,
            exit_failures = t.exit_failures,
            "batch_complete"
        );
        self.post_process().await;
        Ok(summary)
    }

    /// One plugin, clone or pull. Always resolves `Ok`; failures end as a
    /// `Fail` phase with an `Error:` log line.
    async fn run_job(
        &self,
        plugin: &Plugin,
        tx: mpsc::UnboundedSender<JobEvent>,
    ) -> Result<(), PlugError> {
        let dir = plugin.directory.as_path();
        let installed = tokio::fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let phase = if installed {
            Phase::Updating
        } else {
            Phase::Installing
        };
        // The receiver outlives every job, so a failed send only happens after
        // the driver is gone.
        let send = |event: JobEvent| {
            let _ = tx.send(event);
        };
        send(JobEvent::Started {
            dir: dir.to_path_buf(),
            phase,
        });
        let log = |line: &str| {
            send(JobEvent::Line {
                dir: dir.to_path_buf(),
                line: line.to_string(),
            })
        };

        let result = if installed {
            self.git.pull(plugin, &log).await
        } else {
            self.git.clone(plugin, &log).await
        };
        let phase = match result {
            Ok(outcome) => {
                send(JobEvent::Synced {
                    dir: dir.to_path_buf(),
                    revisions: Revisions {
                        from: outcome.from.filter(|r| !r.is_empty()),
                        to: Some(outcome.to).filter(|r| !r.is_empty()),
                    },
                    branch: Some(outcome.branch).filter(|b| !b.is_empty()),
                });
                Phase::Success
            }
            Err(e) => {
                warn!(target: "batch", plugin = %plugin.name, error = %e, timeout = e.is_timeout(), "job_failed");
                log(&format!("Error: {e}"));
                Phase::Fail
            }
        };
        send(JobEvent::Finished {
            dir: dir.to_path_buf(),
            phase,
        });
        Ok(())
    }

    fn apply(&self, event: JobEvent) {
        match event {
            JobEvent::Started { dir, phase } => {
                self.state().begin(&dir, phase);
                if let Err(e) = self.logs.clear(&log_key_for(&dir)) {
                    warn!(target: "batch", dir = %dir.display(), ?e, "log_clear_failed");
                }
            }
            JobEvent::Line { dir, line } => {
                if self.state().append_log(&dir, &line) {
                    if let Err(e) = self.logs.append(&log_key_for(&dir), &line) {
                        warn!(target: "batch", dir = %dir.display(), ?e, "log_append_failed");
                    }
                }
            }
            JobEvent::Synced {
                dir,
                revisions,
                branch,
            } => self.state().record_sync(&dir, revisions, branch),
            JobEvent::Finished { dir, phase } => {
                debug!(target: "batch", dir = %dir.display(), ?phase, "job_finished");
                self.state().set_phase(&dir, phase);
            }
        }
    }

    fn push_report(&self, view: ViewHandle) {
        let lines = self.report();
        self.host.push_lines(view, lines);
    }

    /// Help tags for every changed plugin with documentation, then a single
    /// remote-plugin refresh when any changed plugin is remote-capable.
    async fn post_process(&self) {
        let changed: Vec<PathBuf> = self
            .state()
            .statuses()
            .filter(|(_, s)| s.phase == Phase::Success && s.revisions.changed())
            .map(|(dir, _)| dir.to_path_buf())
            .collect();

        let mut remote = false;
        for dir in &changed {
            let doc = dir.join(DOC_DIR);
            if is_dir(&doc).await {
                self.host.generate_helptags(&doc);
            }
            if is_dir(&dir.join(REMOTE_MANIFEST_DIR)).await {
                remote = true;
            }
        }
        debug!(target: "batch", changed = changed.len(), remote, "post_process");
        if remote {
            self.host.refresh_remote_plugins();
        }
    }

    /// Push the diff between the last recorded revisions of `name`. Silent when
    /// no completed revision is recorded.
    pub async fn diff(&self, view: ViewHandle, name: &str) -> Result<(), PlugError> {
        let Some(plugin) = self.find(name) else {
            return Err(self.reject(PlugError::NotFound(name.to_string())));
        };
        let revisions = self
            .state()
            .status(&plugin.directory)
            .map(|s| s.revisions.clone())
            .unwrap_or_default();
        let Some(to) = revisions.to else {
            debug!(target: "batch", plugin = %plugin.name, "diff_no_revision");
            return Ok(());
        };
        let lines = match revisions.from {
            None => {
                let short: String = to.chars().take(SHORT_REV).collect();
                vec![format!("Installed {short}; nothing to diff.")]
            }
            Some(from) => match self.git.diff(&plugin.directory, &from, &to).await {
                Ok(text) => text.lines().map(str::to_string).collect(),
                Err(e) => vec![format!("Error: {e}")],
            },
        };
        self.host.push_lines(view, lines);
        Ok(())
    }

    /// Push the persisted log of `name`.
    pub fn show_log(&self, view: ViewHandle, name: &str) -> Result<(), PlugError> {
        let Some(plugin) = self.find(name) else {
            return Err(self.reject(PlugError::NotFound(name.to_string())));
        };
        match self.logs.read_all(&plugin.log_key()) {
            Ok(lines) => {
                self.host.push_lines(view, lines);
                Ok(())
            }
            Err(source) => Err(self.reject(PlugError::Io {
                context: format!("failed to read log of {name}"),
                source,
            })),
        }
    }

    /// Move the plugin directory to the trash.
    pub fn remove(&self, name: &str, trash: &dyn Trash) -> Result<PathBuf, PlugError> {
        let Some(plugin) = self.find(name) else {
            return Err(self.reject(PlugError::NotFound(name.to_string())));
        };
        match trash.discard(&plugin.directory) {
            Ok(target) => {
                self.host
                    .notify(&format!("Removed {}", plugin.directory.display()));
                Ok(target)
            }
            Err(source) => Err(self.reject(PlugError::Io {
                context: format!("failed to remove {}", plugin.directory.display()),
                source,
            })),
        }
    }

    /// Report every configured plugin whose directory is missing or not a
    /// directory. Returns the offending directories.
    pub async fn check_integrity(&self) -> Vec<PathBuf> {
        let mut broken = Vec::new();
        for plugin in self.plugins() {
            let dir = &plugin.directory;
            let message = match tokio::fs::metadata(dir).await {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => format!("{} not a directory!", dir.display()),
                Err(_) => format!("{} not exists!", dir.display()),
            };
            self.host.report_error(&message);
            broken.push(plugin.directory);
        }
        info!(target: "batch", broken = broken.len(), "integrity_checked");
        self.host.notify("check completed!");
        broken
    }
}

fn job_panicked(plugin: &Plugin, payload: &(dyn Any + Send)) -> PlugError {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(target: "batch", plugin = %plugin.name, %reason, "job_panicked");
    PlugError::Scheduler(format!("job for {} panicked: {reason}", plugin.name))
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
