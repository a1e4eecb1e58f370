//! Persistent storage for cache entries.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};

use crate::util::fs::{ensure_dir, remove_file_if_exists, write_atomic};

/// Key/value storage for encoded cache entries.
pub trait CacheStore: Send + Sync {
    /// Stored bytes for `key`, or `None` if nothing is stored.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Forget `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

const ENTRY_EXTENSION: &str = "entry";

/// One file per key in a cache directory.
///
/// Writes go through a temporary file renamed over the entry, so a reader
/// never sees a partially written entry.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(FileCacheStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("invalid cache key `{}`", key);
        }
        Ok(self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION)))
    }

    /// Remove every entry. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read cache directory {}", self.dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                remove_file_if_exists(&path)?;
                removed += 1;
            }
        }

        tracing::debug!("removed {} cache entries from {}", removed, self.dir.display());
        Ok(removed)
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read cache entry {}", path.display()))
            }
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        write_atomic(&path, bytes)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        remove_file_if_exists(&path)
    }
}

/// Entries kept in memory for the lifetime of the store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        MemoryCacheStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::open(tmp.path().join("cache")).unwrap();

        assert_eq!(store.get("abc").unwrap(), None);
        store.put("abc", b"first").unwrap();
        store.put("abc", b"second").unwrap();
        assert_eq!(store.get("abc").unwrap(), Some(b"second".to_vec()));

        store.remove("abc").unwrap();
        assert_eq!(store.get("abc").unwrap(), None);
        store.remove("abc").unwrap();
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::open(tmp.path()).unwrap();

        assert!(store.put("../escape", b"x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_file_store_clear_only_removes_entries() {
        let tmp = TempDir::new().unwrap();
        let store = FileCacheStore::open(tmp.path()).unwrap();
        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(tmp.path().join("notes.txt").exists());
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCacheStore::new();
        assert!(store.is_empty());

        store.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);

        store.remove("k").unwrap();
        assert!(store.is_empty());
    }
}
