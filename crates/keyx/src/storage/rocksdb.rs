use std::path::Path;

use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, WriteOptions, DB};

use crate::storage::{Storage, StorageError};

/// RocksDB storage implementation
pub struct RocksDBStorage {
    db: DB,
}

impl std::fmt::Debug for RocksDBStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDBStorage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksDBStorage {
    /// Open (or create) a RocksDB database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&path).map_err(|e| {
            StorageError::StorageError(format!("Failed to create DB directory: {e}"))
        })?;

        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_use_fsync(true);
        options.set_keep_log_file_num(10);

        let db = DB::open(&options, path)
            .map_err(|e| StorageError::StorageError(format!("Failed to open RocksDB: {e}")))?;

        Ok(Self { db })
    }

    fn sync_write_options() -> WriteOptions {
        let mut options = WriteOptions::default();
        // Registration is acknowledged only after the record hits disk
        options.set_sync(true);
        options
    }
}

impl Drop for RocksDBStorage {
    fn drop(&mut self) {
        let _flushed = self.db.flush();
    }
}

#[async_trait]
impl Storage for RocksDBStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| StorageError::StorageError(format!("Failed to get key: {e}")))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.db
            .put_opt(key.as_bytes(), value, &Self::sync_write_options())
            .map_err(|e| StorageError::StorageError(format!("Failed to set key: {e}")))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.db
            .get(key.as_bytes())
            .map(|v| v.is_some())
            .map_err(|e| StorageError::StorageError(format!("Failed to check key existence: {e}")))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| {
                StorageError::StorageError(format!("Failed to iterate over keys: {e}"))
            })?;

            let key_str = String::from_utf8_lossy(&key).into_owned();
            if !key_str.starts_with(prefix) {
                // Keys are sorted, nothing past this point can match
                break;
            }
            keys.push(key_str);
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_rocksdb_storage() {
        let temp_dir = tempdir().unwrap();
        let storage = RocksDBStorage::new(temp_dir.path()).unwrap();

        storage.set("test_key", b"test_value").await.unwrap();
        let value = storage.get("test_key").await.unwrap();
        assert_eq!(value, Some(b"test_value".to_vec()));

        assert!(storage.exists("test_key").await.unwrap());
        assert!(!storage.exists("nonexistent_key").await.unwrap());

        storage.set("test_key", b"replaced").await.unwrap();
        assert_eq!(
            storage.get("test_key").await.unwrap(),
            Some(b"replaced".to_vec())
        );

        storage.set("identity:key1", b"value1").await.unwrap();
        storage.set("identity:key2", b"value2").await.unwrap();
        storage.set("server:keypair", b"value3").await.unwrap();

        let keys = storage.list_keys("identity:").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"identity:key1".to_owned()));
        assert!(keys.contains(&"identity:key2".to_owned()));
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let temp_dir = tempdir().unwrap();

        {
            let storage = RocksDBStorage::new(temp_dir.path()).unwrap();
            storage.set("identity:persisted", b"record").await.unwrap();
        }

        let storage = RocksDBStorage::new(temp_dir.path()).unwrap();
        assert_eq!(
            storage.get("identity:persisted").await.unwrap(),
            Some(b"record".to_vec())
        );
    }
}
