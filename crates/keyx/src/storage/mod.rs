use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StorageConfig;

pub mod memory;
pub mod models;
pub mod rocksdb;

pub use memory::MemoryStorage;
pub use models::{prefixes, ServerKeyRecord, StoredIdentity};

/// Storage error
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Byte-oriented key/value storage
///
/// Everything the service persists goes through this trait: the server key
/// pair singleton and one record per registered identity.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Get a value from storage
    ///
    /// # Arguments
    ///
    /// * `key` - The key to get
    ///
    /// # Returns
    ///
    /// * `Result<Option<Vec<u8>>, StorageError>` - The value if found
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Set a value in storage, replacing any previous value
    ///
    /// The write must be durable by the time the future resolves.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Check if a key exists in storage
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys with a prefix
    ///
    /// # Arguments
    ///
    /// * `prefix` - The prefix to list keys for
    ///
    /// # Returns
    ///
    /// * `Result<Vec<String>, StorageError>` - The keys
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Create a storage instance based on the configuration
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match config {
        StorageConfig::RocksDB { path } => {
            let storage = rocksdb::RocksDBStorage::new(path)?;
            Ok(Arc::new(storage))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// Helper function to serialize an object to JSON
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Helper function to deserialize an object from JSON
pub fn deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(data).map_err(|e| StorageError::SerializationError(e.to_string()))
}
