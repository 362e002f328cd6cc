//! Configuration loading and validation.
//!
//! Parses `oxplug.toml` (or an override path provided by the binary) into a
//! [`ConfigFile`], then resolves it into the structured [`Settings`] and
//! [`Plugin`] records the orchestrator consumes. Resolution happens once, at
//! load time: every default is filled in, `~/` prefixes are expanded and the
//! invariants the scheduler relies on (`threads > 0`, `timeout > 0`, unique
//! plugin directories and log keys) are checked. A file that fails to parse or validate is
//! an error; a missing file yields the defaults with an empty plugin list.
//!
//! Unknown fields are ignored so older binaries tolerate newer config files.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};
use tracing::{info, warn};

pub const CONFIG_FILE_NAME: &str = "oxplug.toml";
pub const APP_DIR_NAME: &str = "oxplug";

/// A plugin as declared by the user. Identity key is `directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub name: String,
    pub directory: PathBuf,
    pub remote: String,
    /// Ref to check out after clone / pull.
    pub dest: Option<String>,
    /// Shell command run after install, and after updates that changed the revision.
    pub hook: Option<String>,
    /// Frozen plugins are skipped by update-all but can still be updated by name.
    pub frozen: bool,
}

impl Plugin {
    /// Key used for persisted logs: the final component of the plugin directory.
    pub fn log_key(&self) -> String {
        log_key_for(&self.directory)
    }
}

/// Log key for an arbitrary plugin directory (falls back to the full path when the
/// directory has no final component).
pub fn log_key_for(directory: &Path) -> String {
    directory
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| directory.display().to_string())
}

#[derive(Debug, Deserialize, Clone)]
pub struct PluginEntry {
    pub name: String,
    pub remote: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub dest: Option<String>,
    #[serde(default, rename = "do", alias = "hook")]
    pub hook: Option<String>,
    #[serde(default)]
    pub frozen: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigFile {
    #[serde(default = "ConfigFile::default_threads")]
    pub threads: usize,
    #[serde(default = "ConfigFile::default_timeout")] // seconds, per external process
    pub timeout: u64,
    #[serde(default)]
    pub shadow: bool,
    #[serde(default)]
    pub rebase: bool,
    #[serde(default = "ConfigFile::default_git")]
    pub git: String,
    /// Installed tool version; detected from `git --version` when absent.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default, rename = "plugin")]
    pub plugins: Vec<PluginEntry>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            threads: Self::default_threads(),
            timeout: Self::default_timeout(),
            shadow: false,
            rebase: false,
            git: Self::default_git(),
            version: None,
            bundle_dir: None,
            log_dir: None,
            state_dir: None,
            plugins: Vec::new(),
        }
    }
}

impl ConfigFile {
    const fn default_threads() -> usize {
        8
    }
    const fn default_timeout() -> u64 {
        60
    }
    fn default_git() -> String {
        "git".to_string()
    }
}

/// Scheduler and tool settings, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub threads: usize,
    pub timeout: Duration,
    pub shadow: bool,
    pub rebase: bool,
    pub git: String,
    pub tool_version: Option<String>,
    pub bundle_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let file = ConfigFile::default();
        let state = default_state_dir();
        Self {
            threads: file.threads,
            timeout: Duration::from_secs(file.timeout),
            shadow: file.shadow,
            rebase: file.rebase,
            git: file.git,
            tool_version: None,
            bundle_dir: default_bundle_dir(),
            log_dir: state.join("log"),
            state_dir: state,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub path: Option<PathBuf>,
    pub settings: Settings,
    pub plugins: Vec<Plugin>,
}

/// Best-effort config path following platform conventions (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!(target: "config", path = %path.display(), ?e, "config_missing_using_defaults");
            return Ok(Config::default());
        }
    };
    let file = toml::from_str::<ConfigFile>(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let mut config = Config::resolve(file)?;
    config.path = Some(path);
    Ok(config)
}

impl Config {
    /// Resolve defaults and validate a parsed file.
    pub fn resolve(file: ConfigFile) -> Result<Self> {
        if file.threads == 0 {
            bail!("`threads` must be a positive integer");
        }
        if file.timeout == 0 {
            bail!("`timeout` must be a positive number of seconds");
        }
        let bundle_dir = file
            .bundle_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(default_bundle_dir);
        let state_dir = file
            .state_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(default_state_dir);
        let log_dir = file
            .log_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| state_dir.join("log"));

        let mut seen = HashSet::new();
        let mut log_keys = HashSet::new();
        let mut plugins = Vec::with_capacity(file.plugins.len());
        for entry in file.plugins {
            if entry.name.trim().is_empty() {
                bail!("plugin entry with empty `name`");
            }
            if entry.remote.trim().is_empty() {
                bail!("plugin `{}` has an empty `remote`", entry.name);
            }
            let directory = entry
                .directory
                .as_deref()
                .map(expand_home)
                .unwrap_or_else(|| bundle_dir.join(&entry.name));
            if !seen.insert(directory.clone()) {
                bail!(
                    "plugin `{}` reuses directory {}",
                    entry.name,
                    directory.display()
                );
            }
            // Persisted logs are keyed by basename.
            let key = log_key_for(&directory);
            if !log_keys.insert(key.clone()) {
                bail!(
                    "plugin `{}` directory {} shares the log name `{key}` with another plugin",
                    entry.name,
                    directory.display()
                );
            }
            plugins.push(Plugin {
                name: entry.name,
                directory,
                remote: entry.remote,
                dest: entry.dest.filter(|d| !d.is_empty()),
                hook: entry.hook.filter(|h| !h.trim().is_empty()),
                frozen: entry.frozen,
            });
        }

        let settings = Settings {
            threads: file.threads,
            timeout: Duration::from_secs(file.timeout),
            shadow: file.shadow,
            rebase: file.rebase,
            git: file.git,
            tool_version: file.version.filter(|v| !v.trim().is_empty()),
            bundle_dir,
            log_dir,
            state_dir,
        };
        info!(
            target: "config",
            threads = settings.threads,
            timeout_secs = settings.timeout.as_secs(),
            shadow = settings.shadow,
            rebase = settings.rebase,
            plugins = plugins.len(),
            "config_resolved"
        );
        Ok(Self {
            path: None,
            settings,
            plugins,
        })
    }

    pub fn find_plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

fn default_bundle_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vim")
        .join("bundle")
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Expand a leading `~/` to the home directory; other paths are returned as-is.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
