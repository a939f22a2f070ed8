//! S3-compatible storage backend over OpenDAL.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use opendal::{services::S3, ErrorKind, Operator};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

use super::{validate_key, ByteStream, Storage, StorageError, StorageResult};
use crate::config::S3Config;

const UPLOAD_CHUNK: usize = 1024 * 1024;

/// Object-store backend. `staging` is the local directory used when the
/// transcoder needs a filesystem path to a remote object.
pub struct S3Storage {
    operator: Operator,
    staging: PathBuf,
}

impl S3Storage {
    pub fn new(config: &S3Config, staging: PathBuf) -> StorageResult<Self> {
        let mut builder = S3::default().bucket(&config.bucket);

        if let Some(ref region) = config.region {
            builder = builder.region(region);
        }
        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(ref key) = config.access_key_id {
            builder = builder.access_key_id(key);
        }
        if let Some(ref secret) = config.secret_access_key {
            builder = builder.secret_access_key(secret);
        }

        let operator = Operator::new(builder)
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .finish();

        Ok(Self { operator, staging })
    }

    fn map_err(path: &str, e: opendal::Error) -> StorageError {
        if e.kind() == ErrorKind::NotFound {
            StorageError::not_found(path)
        } else {
            StorageError::Backend(format!("{path}: {e}"))
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(&self, data: Bytes, path: &str) -> StorageResult<String> {
        validate_key(path)?;
        self.operator
            .write(path, data)
            .await
            .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;
        Ok(path.to_string())
    }

    async fn upload_file(&self, src: &Path, path: &str) -> StorageResult<String> {
        validate_key(path)?;
        let mut file = tokio::fs::File::open(src)
            .await
            .map_err(|e| StorageError::Read(format!("{}: {e}", src.display())))?;

        let mut writer = self
            .operator
            .writer(path)
            .await
            .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;

        let mut buf = vec![0u8; UPLOAD_CHUNK];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| StorageError::Read(format!("{}: {e}", src.display())))?;
            if n == 0 {
                break;
            }
            writer
                .write(Bytes::copy_from_slice(&buf[..n]))
                .await
                .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;
        }
        writer
            .close()
            .await
            .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;

        tokio::fs::remove_file(src)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {e}", src.display())))?;
        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        validate_key(path)?;
        let buffer = self
            .operator
            .read(path)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        Ok(buffer.to_bytes())
    }

    async fn download_stream(&self, path: &str) -> StorageResult<ByteStream> {
        validate_key(path)?;
        let reader = self
            .operator
            .reader(path)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        let stream = reader
            .into_bytes_stream(..)
            .await
            .map_err(|e| Self::map_err(path, e))?;
        let owned = path.to_string();
        Ok(Box::pin(stream.map(move |chunk| {
            chunk.map_err(|e| StorageError::Read(format!("{owned}: {e}")))
        })))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_key(path)?;
        match self.operator.delete(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write(format!("{path}: {e}"))),
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        validate_key(path)?;
        self.operator
            .exists(path)
            .await
            .map_err(|e| StorageError::Read(format!("{path}: {e}")))
    }

    async fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        validate_key(path)?;
        let staged = self.staging.join(path);
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Write(format!("{}: {e}", parent.display())))?;
        }

        let mut stream = self.download_stream(path).await?;
        let mut file = tokio::fs::File::create(&staged)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {e}", staged.display())))?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            tokio::io::AsyncWriteExt::write_all(&mut file, &chunk)
                .await
                .map_err(|e| StorageError::Write(format!("{}: {e}", staged.display())))?;
        }
        tokio::io::AsyncWriteExt::flush(&mut file)
            .await
            .map_err(|e| StorageError::Write(format!("{}: {e}", staged.display())))?;
        Ok(staged)
    }

    async fn delete_directory(&self, prefix: &str) -> StorageResult<()> {
        validate_key(prefix)?;
        // remove_all wants a trailing slash to treat the key as a prefix.
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.operator
            .remove_all(&prefix)
            .await
            .map_err(|e| StorageError::Write(format!("{prefix}: {e}")))
    }
}
