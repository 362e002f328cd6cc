//! Removal of plugin directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Moves abandoned plugin directories out of the bundle.
pub trait Trash: Send + Sync {
    /// Returns where `path` ended up.
    fn discard(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Renames directories into `root`, suffixed with a timestamp so repeated
/// removals of the same plugin never collide.
#[derive(Debug, Clone)]
pub struct TrashDir {
    root: PathBuf,
}

impl TrashDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target_for(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string());
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut target = self.root.join(format!("{name}-{stamp}"));
        let mut n = 1;
        while target.exists() {
            target = self.root.join(format!("{name}-{stamp}-{n}"));
            n += 1;
        }
        target
    }
}

impl Trash for TrashDir {
    fn discard(&self, path: &Path) -> io::Result<PathBuf> {
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        fs::create_dir_all(&self.root)?;
        let target = self.target_for(path);
        fs::rename(path, &target)?;
        tracing::info!(target: "batch", from = %path.display(), to = %target.display(), "plugin_trashed");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_directory_and_avoids_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let trash = TrashDir::new(tmp.path().join("trash"));
        let plugin = tmp.path().join("bundle").join("vim-foo");

        fs::create_dir_all(&plugin).unwrap();
        fs::write(plugin.join("README"), "x").unwrap();
        let first = trash.discard(&plugin).unwrap();
        assert!(!plugin.exists());
        assert!(first.join("README").exists());

        fs::create_dir_all(&plugin).unwrap();
        let second = trash.discard(&plugin).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let trash = TrashDir::new(tmp.path().join("trash"));
        let err = trash.discard(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
