//! Blob store interface
//!
//! Byte-addressed object storage behind a trait so the service can run
//! against S3-compatible storage in production and an in-memory map in
//! tests. Deletion is restricted to the derived-output namespaces to prevent
//! accidental purging of immutable sources.

mod keys;
mod memory;

pub use keys::*;
pub use memory::MemoryBlobStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Deletion refused for key outside the deletable namespaces: {0}")]
    DeleteRefused(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, BlobError>;

/// Byte-addressed object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object's bytes.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store an object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Delete an object. Implementations must refuse keys outside
    /// [`is_deletable_key`].
    async fn delete(&self, key: &str) -> Result<()>;

    /// Produce a signed short-TTL URL for direct download.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(BlobError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
