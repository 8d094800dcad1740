//! In-memory blob store
//!
//! Backs tests and single-node development deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{is_deletable_key, BlobError, BlobStore, Result};

#[derive(Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Map-backed [`BlobStore`].
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Content type recorded for a key, if present.
    pub async fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.read().await;
        objects.get(key).map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| BlobError::ObjectNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if !is_deletable_key(key) {
            return Err(BlobError::DeleteRefused(key.to_string()));
        }
        let mut objects = self.objects.write().await;
        objects.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let objects = self.objects.read().await;
        if !objects.contains_key(key) {
            return Err(BlobError::ObjectNotFound(key.to_string()));
        }
        Ok(format!("memory://{key}?expires_in={}", ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        store
            .put("documents/final/j.pdf", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();

        let bytes = store.get("documents/final/j.pdf").await.unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        assert_eq!(
            store.content_type("documents/final/j.pdf").await.as_deref(),
            Some("application/pdf")
        );
    }

    #[tokio::test]
    async fn delete_refuses_immutable_namespaces() {
        let store = MemoryBlobStore::new();
        store
            .put("documents/original/a.pdf", b"%PDF-1.7".to_vec(), "application/pdf")
            .await
            .unwrap();

        let err = store.delete("documents/original/a.pdf").await.unwrap_err();
        assert!(matches!(err, BlobError::DeleteRefused(_)));
        assert!(store.exists("documents/original/a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_final_outputs() {
        let store = MemoryBlobStore::new();
        store
            .put("documents/final/j.pdf", vec![1], "application/pdf")
            .await
            .unwrap();
        store.delete("documents/final/j.pdf").await.unwrap();
        assert!(!store.exists("documents/final/j.pdf").await.unwrap());
    }
}
