//! Local filesystem storage backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;

use super::{validate_key, ByteStream, Storage, StorageError, StorageResult};

/// Blob store rooted at a directory. Keys map directly to paths under the
/// root after traversal checks.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn full_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Write(format!("{}: {e}", parent.display())))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, data: Bytes, path: &str) -> StorageResult<String> {
        let dest = self.full_path(path)?;
        self.ensure_parent(&dest).await?;
        tokio::fs::write(&dest, &data)
            .await
            .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;
        Ok(path.to_string())
    }

    async fn upload_file(&self, src: &Path, path: &str) -> StorageResult<String> {
        let dest = self.full_path(path)?;
        self.ensure_parent(&dest).await?;

        // Same-device move is a rename. Across devices fall back to a
        // streamed copy + delete, cleaning up the partial file on error.
        match tokio::fs::rename(src, &dest).await {
            Ok(()) => Ok(path.to_string()),
            Err(_) => {
                if let Err(e) = tokio::fs::copy(src, &dest).await {
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(StorageError::Write(format!("{path}: {e}")));
                }
                tokio::fs::remove_file(src)
                    .await
                    .map_err(|e| StorageError::Write(format!("{}: {e}", src.display())))?;
                Ok(path.to_string())
            }
        }
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        let full = self.full_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(path)),
            Err(e) => Err(StorageError::Read(format!("{path}: {e}"))),
        }
    }

    async fn download_stream(&self, path: &str) -> StorageResult<ByteStream> {
        let full = self.full_path(path)?;
        let file = match tokio::fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(path))
            }
            Err(e) => return Err(StorageError::Read(format!("{path}: {e}"))),
        };
        let owned = path.to_string();
        let stream = ReaderStream::new(file)
            .map(move |chunk| chunk.map_err(|e| StorageError::Read(format!("{owned}: {e}"))));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full = self.full_path(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write(format!("{path}: {e}"))),
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let full = self.full_path(path)?;
        Ok(tokio::fs::metadata(&full).await.is_ok())
    }

    async fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let full = self.full_path(path)?;
        tokio::fs::canonicalize(&full).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(path)
            } else {
                StorageError::Read(format!("{path}: {e}"))
            }
        })
    }

    async fn delete_directory(&self, prefix: &str) -> StorageResult<()> {
        let full = self.full_path(prefix)?;
        match tokio::fs::remove_dir_all(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write(format!("{prefix}: {e}"))),
        }
    }
}
