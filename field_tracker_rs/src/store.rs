//! Persistent key-value storage.
//!
//! # File Format
//! `FileStore` keeps one file per key: `{dir}/{key}.json`. Writes go to
//! `{key}.json.tmp`, are fsynced, then renamed over the old file, so a crash
//! mid-write leaves either the previous value or the new one.

use crate::error::{TrackerError, TrackerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> TrackerResult<Option<String>>;

    /// Replace the value for `key`. Either fully applied or not at all.
    async fn set(&self, key: &str, value: &str) -> TrackerResult<()>;

    async fn remove(&self, key: &str) -> TrackerResult<()>;
}

fn validate_key(key: &str) -> TrackerResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TrackerError::Storage(format!("Invalid storage key: {:?}", key)))
    }
}

/// Directory-backed store
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if missing) a storage directory
    pub async fn open(dir: impl AsRef<Path>) -> TrackerResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            TrackerError::Storage(format!("Failed to create storage dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> TrackerResult<Option<String>> {
        validate_key(key)?;
        match tokio::fs::read_to_string(self.key_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Storage(format!("Failed to read {}: {}", key, e))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> TrackerResult<()> {
        validate_key(key)?;
        let tmp = self.temp_path(key);

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to create {}: {}", tmp.display(), e)))?;
        file.write_all(value.as_bytes())
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to write {}: {}", key, e)))?;
        file.sync_all()
            .await
            .map_err(|e| TrackerError::Storage(format!("Failed to sync {}: {}", key, e)))?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, self.key_path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(TrackerError::Storage(format!("Failed to commit {}: {}", key, e)));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> TrackerResult<()> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrackerError::Storage(format!("Failed to remove {}: {}", key, e))),
        }
    }
}

/// In-memory store; writes can be made to fail for exercising error paths
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> TrackerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(TrackerError::Storage("storage is read-only".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> TrackerResult<Option<String>> {
        validate_key(key)?;
        let entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire store lock".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> TrackerResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire store lock".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> TrackerResult<()> {
        validate_key(key)?;
        self.check_writable()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire store lock".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_dir(name: &str) -> PathBuf {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "field_tracker_{}_{}_{}",
        name,
        std::process::id(),
        n
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_set_get_remove() {
        let dir = test_dir("kv");
        let store = FileStore::open(&dir).await.unwrap();
        assert_eq!(store.dir(), dir.as_path());

        assert_eq!(store.get("auth_token").await.unwrap(), None);

        store.set("auth_token", "first").await.unwrap();
        store.set("auth_token", "second").await.unwrap();
        assert_eq!(store.get("auth_token").await.unwrap().as_deref(), Some("second"));

        // Commit leaves no temp file behind
        assert!(!dir.join("auth_token.json.tmp").exists());
        assert!(dir.join("auth_token.json").exists());

        store.remove("auth_token").await.unwrap();
        store.remove("auth_token").await.unwrap();
        assert_eq!(store.get("auth_token").await.unwrap(), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_leftover_temp_file_does_not_shadow_value() {
        let dir = test_dir("kv_tmp");
        let store = FileStore::open(&dir).await.unwrap();
        store.set("pending_locations", "committed").await.unwrap();

        // Simulate a crash after the temp write but before rename
        std::fs::write(dir.join("pending_locations.json.tmp"), "half-writ").unwrap();

        assert_eq!(
            store.get("pending_locations").await.unwrap().as_deref(),
            Some("committed")
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let store = MemoryStore::new();
        assert!(store.set("../escape", "x").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_write_failure() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();

        store.set_fail_writes(true);
        assert!(matches!(store.set("k", "w").await, Err(TrackerError::Storage(_))));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
