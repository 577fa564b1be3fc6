//! Persistent key-value storage
//!
//! The engine and folder index persist whole values under a handful of
//! well-known keys. [`SledStore`] keeps them in a sled embedded database;
//! [`MemoryStore`] keeps them in process memory.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sled::Db;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};

/// Key holding the serialized call log
pub const API_CALLS_KEY: &str = "apiCalls";
/// Key holding the capture enabled flag
pub const CAPTURE_ENABLED_KEY: &str = "captureEnabled";
/// Key holding the folder index
pub const FOLDERS_KEY: &str = "folders";

/// Async key-value store of JSON values
///
/// Keys are independent; there is no transaction across keys.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read a value, `None` if the key was never written
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Durably replace the value under `key`
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Read and deserialize a typed value
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn PersistentStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            AppError::SerializationError(format!("Failed to deserialize '{key}': {e}"))
        }),
        None => Ok(None),
    }
}

/// Serialize and write a typed value
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn PersistentStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value)
        .map_err(|e| AppError::SerializationError(format!("Failed to serialize '{key}': {e}")))?;
    store.set(key, value).await
}

/// Store backed by a sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
}

impl SledStore {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let db = sled::open(db_path)
            .map_err(|e| AppError::StorageError(format!("Failed to open sled database: {e}")))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn tree(&self) -> Result<sled::Tree> {
        self.db
            .open_tree("state")
            .map_err(|e| AppError::StorageError(format!("Failed to open state tree: {e}")))
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let key_count = self.tree()?.len();
        let size_bytes = self
            .db
            .size_on_disk()
            .map_err(|e| AppError::StorageError(format!("Failed to get database size: {e}")))?;

        Ok(StorageStats {
            key_count,
            size_bytes,
        })
    }
}

#[async_trait]
impl PersistentStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let bytes = self
            .tree()?
            .get(key.as_bytes())
            .map_err(|e| AppError::StorageError(format!("Failed to get '{key}': {e}")))?;

        match bytes {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::SerializationError(format!("Failed to decode '{key}': {e}"))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| AppError::SerializationError(format!("Failed to encode '{key}': {e}")))?;

        self.tree()?
            .insert(key.as_bytes(), bytes)
            .map_err(|e| AppError::StorageError(format!("Failed to insert '{key}': {e}")))?;

        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to flush database: {e}")))?;

        tracing::trace!("Persisted key {}", key);
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StorageStats {
    pub key_count: usize,
    pub size_bytes: u64,
}

/// Volatile store for tests and ephemeral sessions
#[derive(Default, Clone)]
pub struct MemoryStore {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
