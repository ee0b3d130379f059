use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::storage::{Storage, StorageError};

/// In-memory storage implementation
///
/// Data is lost when the process exits. Used by tests and by the `memory`
/// storage configuration.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create a new memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let _previous = self.data.write().insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.set("test_key", b"test_value").await.unwrap();
        let value = storage.get("test_key").await.unwrap();
        assert_eq!(value, Some(b"test_value".to_vec()));

        assert!(storage.exists("test_key").await.unwrap());
        assert!(!storage.exists("nonexistent_key").await.unwrap());

        // Overwrite replaces the previous value
        storage.set("test_key", b"other").await.unwrap();
        assert_eq!(storage.get("test_key").await.unwrap(), Some(b"other".to_vec()));

        storage.set("identity:a", b"1").await.unwrap();
        storage.set("identity:b", b"2").await.unwrap();
        storage.set("server:keypair", b"3").await.unwrap();

        let keys = storage.list_keys("identity:").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"identity:a".to_owned()));
        assert!(keys.contains(&"identity:b".to_owned()));
    }

    #[tokio::test]
    async fn test_missing_keys() {
        let storage = MemoryStorage::new();

        assert!(storage.get("nonexistent").await.unwrap().is_none());
        assert!(storage.list_keys("identity:").await.unwrap().is_empty());
    }
}
