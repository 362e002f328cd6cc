//! Serialized form of the last batch's statuses, so a later process can still
//! answer `diff` and `retry` for it.

use crate::PluginStatus;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SNAPSHOT_FILE_NAME: &str = "last-batch.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub total: usize,
    pub elapsed_ms: Option<u64>,
    pub statuses: BTreeMap<PathBuf, PluginStatus>,
}

impl BatchSnapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self).context("failed to encode batch snapshot")?;
        fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
        debug!(target: "batch", path = %path.display(), entries = self.statuses.len(), "snapshot_saved");
        Ok(())
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let body = match fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let snapshot = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BatchState, Phase, Revisions};
    use std::time::Duration;

    #[test]
    fn snapshot_survives_a_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join(SNAPSHOT_FILE_NAME);
        let dir = Path::new("/bundle/vim-surround");

        let mut state = BatchState::new();
        state.reset(1);
        state.begin(dir, Phase::Updating);
        state.record_sync(
            dir,
            Revisions {
                from: Some("1111111111".into()),
                to: Some("2222222222".into()),
            },
            Some("master".into()),
        );
        state.set_phase(dir, Phase::Success);
        state.append_log(dir, "Fast-forward");
        state.elapsed = Some(Duration::from_millis(1500));
        state.snapshot().save(&path).unwrap();

        let loaded = BatchSnapshot::load(&path).unwrap().unwrap();
        let mut restored = BatchState::new();
        restored.restore(loaded);
        assert_eq!(restored.total, 1);
        assert_eq!(restored.elapsed, Some(Duration::from_millis(1500)));
        assert_eq!(restored.status(dir), state.status(dir));
        assert!(restored.log(dir).is_empty());
    }

    #[test]
    fn missing_snapshot_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(BatchSnapshot::load(&tmp.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SNAPSHOT_FILE_NAME);
        fs::write(&path, "{not json").unwrap();
        let err = BatchSnapshot::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }
}
