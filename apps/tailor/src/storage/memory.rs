use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use super::{keys, ArtifactStore, PutReceipt, StorageError};

/// Process-local store for tests. Records content types for assertions.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (Bytes, String)>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.lock();
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Full snapshot of the store, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, Bytes)> {
        let objects = self.lock();
        let mut all: Vec<(String, Bytes)> = objects
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|(_, ct)| ct.clone())
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<PutReceipt, StorageError> {
        keys::validate_key(key)?;
        let size = bytes.len();
        self.lock()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(PutReceipt {
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.lock()
            .get(key)
            .map(|(b, _)| b.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut found: Vec<String> = self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        found.sort();
        Ok(found)
    }
}
