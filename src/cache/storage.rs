//! Storage Substrate Module
//!
//! Key-value storage backends underneath the cache store.
//!
//! `MemoryStore` enforces an optional byte capacity and reports quota
//! exhaustion the same way a constrained persistent substrate would, which
//! is what the store adapter's recovery path is written against.
//! `FileStore` persists one file per key under a root directory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::{Result, SyncError};

// == Key-Value Store Trait ==
/// Durable string key → string value storage.
///
/// `set` must fail with `SyncError::QuotaExceeded` when the substrate is out
/// of space; every other operation is expected to be cheap and infallible in
/// the common case.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value, replacing any previous one.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Deletes a key. Deleting an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Lists every stored key, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;
}

// == Memory Store ==
/// In-memory backend with an optional byte capacity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    /// Capacity in bytes over keys and values, None = unbounded
    max_bytes: Option<usize>,
    used_bytes: usize,
}

impl MemoryStore {
    /// Creates an unbounded in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects writes past `max_bytes`.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_bytes: Some(max_bytes),
            used_bytes: 0,
        }
    }

    /// Bytes currently held across keys and values.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (old_len, key_len) = match self.entries.get(key) {
            Some(old) => (old.len(), 0),
            None => (0, key.len()),
        };
        let projected = self.used_bytes - old_len + value.len() + key_len;

        if let Some(max) = self.max_bytes {
            if projected > max {
                return Err(SyncError::QuotaExceeded(format!(
                    "memory store at {} of {} bytes, write of {} rejected",
                    self.used_bytes,
                    max,
                    value.len()
                )));
            }
        }

        self.entries.insert(key.to_string(), value.to_string());
        self.used_bytes = projected;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if let Some(old) = self.entries.remove(key) {
            self.used_bytes -= old.len() + key.len();
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

// == File Store ==
/// File-per-key backend rooted at a directory.
///
/// Keys are base64-encoded into file names so the mapping is reversible for
/// arbitrary key strings. Writes from two processes sharing a root
/// interleave last-write-wins per key.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a file store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        self.root.join(format!("{}.kv", URL_SAFE_NO_PAD.encode(key)))
    }

    fn key_for(path: &std::path::Path) -> Option<String> {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        let stem = path.file_stem()?.to_str()?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key), value).map_err(|e| {
            // ENOSPC maps to the quota path so eviction recovery kicks in
            if e.raw_os_error() == Some(28) {
                SyncError::QuotaExceeded(e.to_string())
            } else {
                SyncError::Io(e)
            }
        })
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("kv") {
                if let Some(key) = Self::key_for(&path) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.set("cache:score_board", "payload").unwrap();

        assert_eq!(
            store.get("cache:score_board").unwrap(),
            Some("payload".to_string())
        );
        assert_eq!(store.get("cache:sma").unwrap(), None);
    }

    #[test]
    fn test_memory_store_remove_is_idempotent() {
        let mut store = MemoryStore::new();
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_memory_store_quota_rejection() {
        let mut store = MemoryStore::with_capacity(20);
        store.set("a", "0123456789").unwrap();

        let result = store.set("b", "0123456789");
        assert!(matches!(result, Err(SyncError::QuotaExceeded(_))));

        // The rejected write must not have been applied
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn test_memory_store_overwrite_accounting() {
        let mut store = MemoryStore::with_capacity(64);
        store.set("key", "a long initial value here").unwrap();
        let used_after_first = store.used_bytes();

        store.set("key", "short").unwrap();
        assert!(store.used_bytes() < used_after_first);

        // Freed capacity is reusable
        store.set("key2", "another value").unwrap();
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();

        store.set("cache:score_board", "compressed payload").unwrap();
        assert_eq!(
            store.get("cache:score_board").unwrap(),
            Some("compressed payload".to_string())
        );

        let keys = store.keys().unwrap();
        assert_eq!(keys, vec!["cache:score_board".to_string()]);

        store.remove("cache:score_board").unwrap();
        assert_eq!(store.get("cache:score_board").unwrap(), None);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_missing_key_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("cache:absent").unwrap(), None);
    }
}
