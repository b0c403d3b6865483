//! Artifact store: the blob store every pipeline stage reads from and writes to.
//!
//! Keys follow `{kind}/{jobId}[.variant].{ext}`; see [`keys`] for the builders.
//! Completion of a stage is the presence of its artifact, so `put` overwrites.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod keys;
pub mod local;
#[cfg(test)]
pub mod memory;
pub mod s3;

pub use local::LocalArtifactStore;
#[cfg(test)]
pub use memory::InMemoryArtifactStore;
pub use s3::S3ArtifactStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Returned by a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub key: String,
    pub size: usize,
}

/// Blob storage keyed by artifact key.
///
/// Implementations must tolerate concurrent writers to different keys.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<PutReceipt, StorageError>;

    /// Fails with [`StorageError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Keys starting with `prefix`, sorted. The prefix is `{kind}/{name start}`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
