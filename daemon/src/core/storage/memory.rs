use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::Storage;
use crate::core::error::StorageError;

/// In-memory provider, used by tests and as the zero-setup default.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        entries.insert(key.to_vec(), value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        storage.put(b"a", vec![1]).await.unwrap();
        assert_eq!(storage.get(b"a").await.unwrap(), Some(vec![1]));

        storage.delete(b"a").await.unwrap();
        assert_eq!(storage.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let storage = MemoryStorage::new();
        storage.put(b"acc:1", vec![1]).await.unwrap();
        storage.put(b"acc:2", vec![2]).await.unwrap();
        storage.put(b"block:1", vec![3]).await.unwrap();

        let found = storage.scan_prefix(b"acc:").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, b"acc:1".to_vec());
    }
}
