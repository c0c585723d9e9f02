//! Key-value storage tiers.
//!
//! Two tiers mirror what a browser offers: a durable store that persists
//! across restarts (a JSON file on disk) and a tab-scoped store that is
//! dropped together with the running shell (in memory).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::StorageError;

/// A string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Used as the tab-scoped tier.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// On-disk layout of the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: HashMap<String, String>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: 1,
            entries: HashMap::new(),
        }
    }
}

/// Durable store backed by a JSON file.
///
/// Reads are served from memory; every write is flushed to disk before it
/// returns. Memory only changes once the file has been written, so a failed
/// write leaves both as they were.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: RwLock<StoreFile>,
}

impl FileStore {
    /// Open the store at the default or specified path.
    ///
    /// A missing file yields an empty store; it is created on first write.
    pub async fn open(path: Option<PathBuf>) -> Result<Self, StorageError> {
        let path = path.unwrap_or_else(Self::default_path);

        let data = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            StoreFile::default()
        };

        debug!(path = %path.display(), entries = data.entries.len(), "opened durable store");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Get the default store path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skywatch")
            .join("storage.json")
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store to disk with restricted permissions.
    async fn save(&self, data: &StoreFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;

        let temp_path = self.path.with_extension("tmp");
        let result = Self::write_file(&temp_path, content.as_bytes()).await;
        let result = match result {
            Ok(()) => fs::rename(&temp_path, &self.path).await.map_err(Into::into),
            Err(e) => Err(e),
        };

        if result.is_err() {
            // Leave nothing half-written behind. A directory in the way is
            // not ours to remove.
            if fs::metadata(&temp_path).await.is_ok_and(|m| m.is_file()) {
                let _ = fs::remove_file(&temp_path).await;
            }
        }
        result
    }

    async fn write_file(path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(path).await?;

        // Tokens live here, keep the file owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = file.metadata().await?.permissions();
            perms.set_mode(0o600);
            file.set_permissions(perms).await?;
        }

        file.write_all(content).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.data.read().await.entries.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        next.entries.insert(key.to_string(), value.to_string());
        self.save(&next).await?;
        *data = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        if !data.entries.contains_key(key) {
            return Ok(());
        }
        let mut next = data.clone();
        next.entries.remove(key);
        self.save(&next).await?;
        *data = next;
        Ok(())
    }
}

/// The pair of storage tiers a session is kept in.
#[derive(Clone)]
pub struct StorageTiers {
    /// Survives restarts.
    pub durable: Arc<dyn KeyValueStore>,
    /// Cleared when the shell exits.
    pub tab: Arc<dyn KeyValueStore>,
}

impl StorageTiers {
    pub fn new(durable: Arc<dyn KeyValueStore>, tab: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, tab }
    }

    /// Both tiers in memory.
    pub fn in_memory() -> Self {
        Self {
            durable: Arc::new(MemoryStore::new()),
            tab: Arc::new(MemoryStore::new()),
        }
    }
}

impl std::fmt::Debug for StorageTiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTiers").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemoryStore::new();

        assert_eq!(store.get("auth").await, None);

        store.set("auth", "token-1").await.unwrap();
        assert_eq!(store.get("auth").await, Some("token-1".to_string()));

        store.set("auth", "token-2").await.unwrap();
        assert_eq!(store.get("auth").await, Some("token-2".to_string()));

        store.remove("auth").await.unwrap();
        assert_eq!(store.get("auth").await, None);

        // Removing again is fine
        store.remove("auth").await.unwrap();
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let store = FileStore::open(Some(path.clone())).await.unwrap();
        assert_eq!(store.get("auth").await, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn file_store_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");

        {
            let store = FileStore::open(Some(path.clone())).await.unwrap();
            store.set("latestTemperature", "21.5").await.unwrap();
            store.set("auth", "secret").await.unwrap();
            store.remove("auth").await.unwrap();
        }

        {
            let store = FileStore::open(Some(path)).await.unwrap();
            assert_eq!(
                store.get("latestTemperature").await,
                Some("21.5".to_string())
            );
            assert_eq!(store.get("auth").await, None);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let store = FileStore::open(Some(path.clone())).await.unwrap();
        store.set("auth", "secret").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_matching_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let store = FileStore::open(Some(path.clone())).await.unwrap();
        store.set("auth", "tok").await.unwrap();

        // A directory where the temp file goes makes every save fail
        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(store.remove("auth").await.is_err());
        assert_eq!(store.get("auth").await, Some("tok".to_string()));

        assert!(store.set("latestTemperature", "20").await.is_err());
        assert_eq!(store.get("latestTemperature").await, None);

        let reloaded = FileStore::open(Some(path.clone())).await.unwrap();
        assert_eq!(reloaded.get("auth").await, Some("tok".to_string()));
        assert_eq!(reloaded.get("latestTemperature").await, None);

        // Once writes work again the removal goes through
        std::fs::remove_dir(&blocker).unwrap();
        store.remove("auth").await.unwrap();
        let reloaded = FileStore::open(Some(path)).await.unwrap();
        assert_eq!(reloaded.get("auth").await, None);
        assert!(!blocker.exists());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();

        let result = FileStore::open(Some(path)).await;
        assert!(matches!(result, Err(StorageError::Json(_))));
    }
}
