#![allow(dead_code)] // Shared across integration test binaries; each uses a subset.

use core_actions::Orchestrator;
use core_config::{Plugin, Settings, log_key_for};
use core_events::ViewHandle;
use core_events::recording::RecordingHost;
use core_process::scripted::{Scripted, ScriptedRunner};
use core_process::CommandSpec;
use core_state::MemoryLogStore;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const VIEW: ViewHandle = ViewHandle(1);

/// Scripted remote for one plugin.
#[derive(Debug, Clone)]
pub struct Repo {
    /// Revision before the sync; `None` means not installed yet.
    pub before: Option<&'static str>,
    pub after: &'static str,
    pub delay: Duration,
    pub exit: Option<i32>,
    pub hook: Option<&'static str>,
    pub frozen: bool,
    pub docs: bool,
    pub remote_plugin: bool,
    /// The tool crashes the job instead of answering the clone / pull.
    pub crash: bool,
}

impl Repo {
    pub fn fresh(after: &'static str) -> Self {
        Self {
            before: None,
            after,
            delay: Duration::ZERO,
            exit: None,
            hook: None,
            frozen: false,
            docs: false,
            remote_plugin: false,
            crash: false,
        }
    }

    pub fn installed(before: &'static str, after: &'static str) -> Self {
        Self {
            before: Some(before),
            ..Self::fresh(after)
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit = Some(code);
        self
    }

    pub fn hook(mut self, hook: &'static str) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn docs(mut self) -> Self {
        self.docs = true;
        self
    }

    pub fn remote_plugin(mut self) -> Self {
        self.remote_plugin = true;
        self
    }

    pub fn crash(mut self) -> Self {
        self.crash = true;
        self
    }
}

fn args(spec: &CommandSpec) -> Vec<&str> {
    spec.args.iter().map(String::as_str).collect()
}

/// Fake version-control tool keyed by plugin directory basename. A repo reports
/// its `before` revision until a clone or pull for it ran, `after` from then on.
pub fn fake_git(repos: HashMap<String, Repo>) -> ScriptedRunner {
    let synced: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
    ScriptedRunner::new(move |spec| {
        if spec.program == "sh" || spec.program == "cmd" {
            let cmd = spec.args.last().cloned().unwrap_or_default();
            return Scripted::stdout(format!("hook ran: {cmd}\n"));
        }
        let cwd_key = log_key_for(&spec.cwd);
        let sync = |key: &str| {
            let Some(repo) = repos.get(key) else {
                return Scripted::exit(128);
            };
            if repo.crash {
                panic!("scripted tool crashed on '{key}'");
            }
            synced.lock().unwrap().insert(key.to_string());
            let scripted = match repo.exit {
                Some(code) => Scripted::exit(code),
                None => Scripted::ok(),
            };
            scripted
                .with_lines([
                    format!("Syncing '{key}'..."),
                    "Receiving objects:  50%\rReceiving objects: 100%".to_string(),
                    String::new(),
                ])
                .with_delay(repo.delay)
        };
        match args(spec).as_slice() {
            ["clone", _, target, ..] => sync(*target),
            ["pull", ..] => sync(cwd_key.as_str()),
            ["rev-parse", "--verify", "HEAD"] => {
                let Some(repo) = repos.get(&cwd_key) else {
                    return Scripted::exit(128);
                };
                let rev = if synced.lock().unwrap().contains(&cwd_key) {
                    Some(repo.after)
                } else {
                    repo.before
                };
                match rev {
                    Some(rev) => Scripted::stdout(format!("{rev}\n")),
                    None => Scripted::exit(128),
                }
            }
            ["symbolic-ref", "-q", "HEAD"] => Scripted::stdout("refs/heads/master\n"),
            ["checkout", _] => Scripted::ok(),
            ["--no-pager", "diff", "--no-color", from, to] => {
                Scripted::stdout(format!("diff {from}..{to}\n+added line\n"))
            }
            ["--version"] => Scripted::stdout("git version 2.43.0\n"),
            _ => Scripted::exit(1),
        }
    })
}

pub fn settings(tmp: &Path, threads: usize, timeout: Duration) -> Settings {
    let state = tmp.join("state");
    Settings {
        threads,
        timeout,
        shadow: false,
        rebase: false,
        git: "git".into(),
        tool_version: Some("2.43.0".into()),
        bundle_dir: tmp.join("bundle"),
        log_dir: state.join("log"),
        state_dir: state,
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub host: Arc<RecordingHost>,
    pub runner: Arc<ScriptedRunner>,
    pub logs: Arc<MemoryLogStore>,
    pub orch: Orchestrator,
}

impl Fixture {
    pub fn new(threads: usize, timeout: Duration, repos: &[(&str, Repo)]) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path(), threads, timeout);
        let mut plugins = Vec::new();
        let mut scripted = HashMap::new();
        for (name, repo) in repos {
            let directory = settings.bundle_dir.join(name);
            // Working tree of an installed plugin; `docs` / `remote_plugin`
            // only apply to those.
            if repo.before.is_some() {
                std::fs::create_dir_all(&directory).unwrap();
                if repo.docs {
                    std::fs::create_dir_all(directory.join("doc")).unwrap();
                }
                if repo.remote_plugin {
                    std::fs::create_dir_all(directory.join("rplugin")).unwrap();
                }
            }
            plugins.push(Plugin {
                name: name.to_string(),
                directory,
                remote: format!("https://example.invalid/{name}.git"),
                dest: None,
                hook: repo.hook.map(String::from),
                frozen: repo.frozen,
            });
            scripted.insert(name.to_string(), repo.clone());
        }
        let host = Arc::new(RecordingHost::new());
        let runner = Arc::new(fake_git(scripted));
        let logs = Arc::new(MemoryLogStore::new());
        let orch = Orchestrator::new(
            settings,
            plugins,
            runner.clone(),
            host.clone(),
            logs.clone(),
        );
        Self {
            tmp,
            host,
            runner,
            logs,
            orch,
        }
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.orch.settings().bundle_dir.join(name)
    }

    pub fn log(&self, name: &str) -> Vec<String> {
        self.orch.with_state(|s| s.log(&self.dir(name)).to_vec())
    }

    pub fn hook_runs(&self) -> usize {
        self.runner
            .calls()
            .iter()
            .filter(|c| c.program == "sh" || c.program == "cmd")
            .count()
    }
}
