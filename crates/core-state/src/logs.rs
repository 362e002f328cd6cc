//! Per-plugin log persistence.
//!
//! Keys are plugin directory basenames. A store only has to support the three
//! operations the orchestrator performs: append while a job runs, read back for
//! `show_log`, and clear when a job for that key starts.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

pub trait LogStore: Send + Sync {
    fn append(&self, key: &str, line: &str) -> io::Result<()>;
    fn read_all(&self, key: &str) -> io::Result<Vec<String>>;
    fn clear(&self, key: &str) -> io::Result<()>;
}

/// One `<key>.log` file per plugin under `root`.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.log"))
    }
}

impl LogStore for FileLogStore {
    fn append(&self, key: &str, line: &str) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(key))?;
        writeln!(file, "{line}")
    }

    fn read_all(&self, key: &str) -> io::Result<Vec<String>> {
        let file = match fs::File::open(self.path_for(key)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        BufReader::new(file).lines().collect()
    }

    fn clear(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&self, key: &str, line: &str) -> io::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn read_all(&self, key: &str) -> io::Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn clear(&self, key: &str) -> io::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_appends_and_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(tmp.path().join("log"));
        assert!(store.read_all("vim-fugitive").unwrap().is_empty());

        store.append("vim-fugitive", "cd /b").unwrap();
        store.append("vim-fugitive", "git pull").unwrap();
        store.append("other", "x").unwrap();
        assert_eq!(
            store.read_all("vim-fugitive").unwrap(),
            vec!["cd /b".to_string(), "git pull".to_string()]
        );

        store.clear("vim-fugitive").unwrap();
        assert!(store.read_all("vim-fugitive").unwrap().is_empty());
        assert_eq!(store.read_all("other").unwrap(), vec!["x".to_string()]);
        // Clearing a missing key is fine.
        store.clear("vim-fugitive").unwrap();
    }

    #[test]
    fn memory_store_is_keyed() {
        let store = MemoryLogStore::new();
        store.append("a", "1").unwrap();
        store.append("b", "2").unwrap();
        store.append("a", "3").unwrap();
        assert_eq!(store.read_all("a").unwrap(), vec!["1".to_string(), "3".to_string()]);
        store.clear("a").unwrap();
        assert!(store.read_all("a").unwrap().is_empty());
        assert_eq!(store.read_all("b").unwrap().len(), 1);
    }
}
