//! Blob store: streaming writes and offset reads over an OpenDAL operator

use futures::StreamExt;
use mvault_core::types::{BlobId, ByteStream};
use opendal::Operator;
use tokio::io::AsyncRead;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::health;
use crate::resolve::{self, DiagnosticReport};

/// Readable blob body
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a completed `store`
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub id: BlobId,
    /// Storage key the blob was written under
    pub path: String,
    /// Bytes written
    pub size: u64,
}

/// An opened blob, positioned at the requested offset
pub struct OpenedBlob {
    pub reader: BlobReader,
    /// Full blob length, independent of the offset
    pub content_length: u64,
}

impl std::fmt::Debug for OpenedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedBlob")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    op: Operator,
    prefix: String,
}

impl BlobStore {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { op, prefix }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stream `body` into a new blob under a structured id. A failed write
    /// is aborted so no partial blob is left behind.
    pub async fn store(
        &self,
        mut body: ByteStream,
        filename: &str,
        content_type: &str,
    ) -> StorageResult<StoredBlob> {
        let uuid = Uuid::new_v4();
        let id = BlobId(uuid.to_string());
        let path = resolve::structured_path(&self.prefix, &uuid);

        let mut writer = self.op.writer(&path).await?;
        let mut size = 0u64;
        while let Some(next) = body.next().await {
            let result = match next {
                Ok(chunk) => {
                    size += chunk.len() as u64;
                    writer.write(chunk).await.map_err(StorageError::Backend)
                }
                Err(e) => Err(StorageError::Io(e)),
            };
            if let Err(e) = result {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(%path, "aborting failed write: {abort_err}");
                }
                return Err(e);
            }
        }
        writer.close().await?;

        tracing::info!(blob = %id, %path, size, filename, content_type, "blob stored");
        Ok(StoredBlob { id, path, size })
    }

    /// Open blob `id` for reading, starting `offset` bytes in.
    pub async fn open_read(&self, id: &str, offset: u64) -> StorageResult<OpenedBlob> {
        let path = resolve::resolve(&self.op, &self.prefix, id).await?;
        let content_length = self
            .op
            .stat(&path)
            .await
            .map_err(|e| StorageError::from_backend(e, id))?
            .content_length();

        if offset >= content_length {
            return Ok(OpenedBlob {
                reader: Box::new(tokio::io::empty()),
                content_length,
            });
        }

        let reader = self
            .op
            .reader(&path)
            .await
            .map_err(|e| StorageError::from_backend(e, id))?
            .into_futures_async_read(offset..content_length)
            .await
            .map_err(|e| StorageError::from_backend(e, id))?
            .compat();

        tracing::debug!(blob = id, %path, offset, content_length, "blob opened");
        Ok(OpenedBlob {
            reader: Box::new(reader),
            content_length,
        })
    }

    /// Full blob length
    pub async fn stat(&self, id: &str) -> StorageResult<u64> {
        let path = resolve::resolve(&self.op, &self.prefix, id).await?;
        let meta = self
            .op
            .stat(&path)
            .await
            .map_err(|e| StorageError::from_backend(e, id))?;
        Ok(meta.content_length())
    }

    pub async fn exists(&self, id: &str) -> StorageResult<bool> {
        match resolve::resolve(&self.op, &self.prefix, id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = resolve::resolve(&self.op, &self.prefix, id).await?;
        self.op
            .delete(&path)
            .await
            .map_err(|e| StorageError::from_backend(e, id))?;
        tracing::info!(blob = id, %path, "blob deleted");
        Ok(())
    }

    /// Run every id resolver against `id` for operator logging.
    pub async fn diagnose(&self, id: &str) -> DiagnosticReport {
        resolve::diagnose(&self.op, &self.prefix, id).await
    }

    pub async fn check_health(&self) -> StorageResult<()> {
        health::check_health(&self.op).await
    }
}
