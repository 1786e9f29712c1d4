use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Storage failures. Callers treat these as non-fatal where the data can be
/// rebuilt (recents) and fatal where it cannot (the confirmed location).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage operation failed: {0}")]
    OperationFailed(String),
}

/// Key-value persistence boundary. Values are opaque JSON strings; the
/// stores above this trait own the schema of each key.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Fetch and decode a JSON value, or `None` when the key is absent.
pub async fn load_json<T: DeserializeOwned>(
    storage: &dyn StorageBackend,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON value under `key`.
pub async fn store_json<T: Serialize>(
    storage: &dyn StorageBackend,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    storage.set(key, raw).await
}

/// Process-local storage for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::OperationFailed(format!("Lock error: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::OperationFailed(format!("Lock error: {}", e)))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::OperationFailed(format!("Lock error: {}", e)))?;
        entries.remove(key);
        Ok(())
    }
}

/// Durable storage backed by a single JSON document on disk.
///
/// Writes go through a temp file followed by a rename so a crash mid-write
/// never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    entries: Arc<tokio::sync::Mutex<HashMap<String, String>>>,
}

impl FileStorage {
    /// Open or create the store at `path`, loading any existing document.
    /// An unreadable document is logged and replaced on the next write.
    #[instrument]
    pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable storage document");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "Opened file storage");
        Ok(Self {
            path,
            entries: Arc::new(tokio::sync::Mutex::new(entries)),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trips() {
        let storage = MemoryStorage::new();
        storage
            .set("greeting", "\"hello\"".to_string())
            .await
            .unwrap();
        assert_eq!(
            storage.get("greeting").await.unwrap().as_deref(),
            Some("\"hello\"")
        );
        storage.remove("greeting").await.unwrap();
        assert!(storage.get("greeting").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_helpers_round_trip_typed_values() {
        let storage = MemoryStorage::new();
        store_json(&storage, "numbers", &vec![1_u32, 2, 3])
            .await
            .unwrap();
        let back: Option<Vec<u32>> = load_json(&storage, "numbers").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u32>> = load_json(&storage, "absent").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let storage = FileStorage::open(path.clone()).await.unwrap();
        storage.set("key", "\"value\"".to_string()).await.unwrap();
        drop(storage);

        let reopened = FileStorage::open(path).await.unwrap();
        assert_eq!(
            reopened.get("key").await.unwrap().as_deref(),
            Some("\"value\"")
        );
    }

    #[tokio::test]
    async fn file_storage_survives_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let storage = FileStorage::open(path).await.unwrap();
        assert!(storage.get("key").await.unwrap().is_none());
        storage.set("key", "\"ok\"".to_string()).await.unwrap();
        assert_eq!(storage.get("key").await.unwrap().as_deref(), Some("\"ok\""));
    }
}
