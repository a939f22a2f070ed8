//! Blob storage abstraction.
//!
//! Paths are forward-slash relative keys; each backend resolves them to its
//! own location. The read side is deliberately split: `download` buffers
//! whole objects and is only for small things (manifests), while
//! `download_stream` is lazy and feeds segment responses without ever
//! holding a full segment in memory.

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::config::{StorageBackend, StorageConfig};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Lazy stream of object bytes. Errors surface asynchronously; consumers
/// must propagate them.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {path}")]
    NotFound { path: String },

    #[error("storage read failed: {0}")]
    Read(String),

    #[error("storage write failed: {0}")]
    Write(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Polymorphic blob store. Constructor-injected wherever the pipeline or
/// the HLS server needs bytes; never a process-wide global.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write an entire in-memory blob, creating intermediate directories.
    async fn upload(&self, data: Bytes, path: &str) -> StorageResult<String>;

    /// Move a local file into storage. Never buffers the whole file: the
    /// local backend renames (falling back to a streamed copy + delete),
    /// remote backends stream the upload. The source file is consumed.
    async fn upload_file(&self, src: &Path, path: &str) -> StorageResult<String>;

    /// Fully-buffered read. Small objects only.
    async fn download(&self, path: &str) -> StorageResult<Bytes>;

    /// Lazy read. Fails with `NotFound` before any bytes flow.
    async fn download_stream(&self, path: &str) -> StorageResult<ByteStream>;

    /// Idempotent: a missing object is not an error.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// A local filesystem path the external encoder can read the object
    /// from. Remote backends stage a scratch copy.
    async fn resolve(&self, path: &str) -> StorageResult<PathBuf>;

    /// Recursive, idempotent delete of everything under `prefix`.
    async fn delete_directory(&self, prefix: &str) -> StorageResult<()>;
}

/// Build the configured backend.
pub fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStorage::new(config.root.clone()))),
        StorageBackend::S3 => Ok(Arc::new(S3Storage::new(&config.s3, config.root.clone())?)),
    }
}

/// Reject empty keys, absolute paths and traversal components before any
/// backend resolution happens.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.split('/').any(|part| part == ".." || part == "." || part.is_empty()) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
