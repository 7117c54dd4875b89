//! Upload and streaming use cases
//!
//! Read path: catalog lookup → blob open (at a frame boundary for encrypted
//! objects) → chunked decryption → windowed copy. Write path is the inverse.

use futures::StreamExt;
use mvault_core::types::{
    ByteStream, EncryptedObjectDescriptor, ObjectId, ObjectMetadata, ObjectRecord,
};
use mvault_core::{VaultError, VaultResult};
use mvault_crypto::{decrypt_stream, encrypt_stream, ChunkLayout, CipherEngine, KeyEnvelope};
use mvault_storage::{BlobStore, DiagnosticReport, OpenedBlob, StorageError};
use mvault_transfer::{stream_reader, StreamCopier};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::catalog::Catalog;
use crate::metrics::VaultMetrics;

/// Tunables taken from `[crypto]` and `[streaming]`
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub chunk_size: usize,
    pub copy_buffer_size: usize,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub uploader_id: String,
    pub encrypt: bool,
}

/// Client-facing summary of an object
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub supports_range_requests: bool,
    pub chunk_size: u64,
    pub encrypted: bool,
    pub view_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub object_id: String,
    pub in_catalog: bool,
    pub blob_id: String,
    pub report: DiagnosticReport,
}

pub struct MediaService {
    store: BlobStore,
    catalog: RwLock<Catalog>,
    engine: CipherEngine,
    envelope: Option<KeyEnvelope>,
    settings: ServiceSettings,
    copier: StreamCopier,
    metrics: VaultMetrics,
}

impl MediaService {
    pub fn new(
        store: BlobStore,
        catalog: Catalog,
        engine: CipherEngine,
        envelope: Option<KeyEnvelope>,
        settings: ServiceSettings,
        metrics: VaultMetrics,
    ) -> Self {
        Self {
            store,
            catalog: RwLock::new(catalog),
            engine,
            envelope,
            copier: StreamCopier::new(settings.copy_buffer_size),
            settings,
            metrics,
        }
    }

    pub fn metrics(&self) -> &VaultMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    fn envelope(&self) -> VaultResult<&KeyEnvelope> {
        self.envelope
            .as_ref()
            .ok_or_else(|| VaultError::Config("no master secret configured".into()))
    }

    /// Store `body` as a new object, encrypting it chunk by chunk if asked.
    pub async fn upload(&self, body: ByteStream, req: UploadRequest) -> VaultResult<ObjectRecord> {
        let received = Arc::new(AtomicU64::new(0));
        let body = limit_body(body, self.settings.max_upload_bytes, received.clone());

        let (stored, encryption, chunk_size) = if req.encrypt {
            let envelope = self.envelope()?;
            let key = self.engine.generate_key()?;
            let wrapped = envelope.wrap(&key)?;
            let frames = encrypt_stream(
                stream_reader(body),
                self.engine.clone(),
                key,
                self.settings.chunk_size,
            )?;
            let stored = self.store.store(frames, &req.filename, &req.content_type).await;
            (
                stored,
                EncryptedObjectDescriptor::encrypted(wrapped),
                self.settings.chunk_size as u64,
            )
        } else {
            let stored = self.store.store(body, &req.filename, &req.content_type).await;
            (stored, EncryptedObjectDescriptor::plain(), 0)
        };

        let size = received.load(Ordering::Relaxed);
        let stored = stored.map_err(|e| {
            if size > self.settings.max_upload_bytes {
                VaultError::Validation(format!(
                    "upload exceeds {} bytes",
                    self.settings.max_upload_bytes
                ))
            } else {
                VaultError::from(e)
            }
        })?;

        let record = ObjectRecord {
            id: ObjectId::new(),
            blob_id: stored.id,
            metadata: ObjectMetadata {
                uploader_id: req.uploader_id,
                original_filename: req.filename,
                content_type: req.content_type,
                size,
                upload_timestamp: unix_now(),
            },
            encryption,
            chunk_size,
            view_count: 0,
        };
        if let Err(e) = self.catalog.write().await.insert(record.clone()) {
            // the record never became visible; drop its blob too
            if let Err(rm) = self.store.delete(record.blob_id.as_str()).await {
                tracing::warn!(blob = %record.blob_id, "removing orphaned blob: {rm}");
            }
            return Err(e.into());
        }
        self.metrics.upload(req.encrypt, size);

        tracing::info!(
            object = %record.id,
            blob = %record.blob_id,
            size,
            stored = stored.size,
            encrypted = req.encrypt,
            "object uploaded"
        );
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> VaultResult<ObjectRecord> {
        self.catalog
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| VaultError::ResourceNotFound(format!("object {id}")))
    }

    pub async fn list(&self) -> Vec<ObjectRecord> {
        self.catalog.read().await.list().into_iter().cloned().collect()
    }

    /// Plaintext bytes `[start, start + len)` of `record` as a lazy stream.
    pub async fn open_window(
        &self,
        record: &ObjectRecord,
        start: u64,
        len: u64,
    ) -> VaultResult<ByteStream> {
        if len == 0 {
            return Ok(Box::pin(futures::stream::empty()));
        }

        if !record.encryption.is_encrypted {
            let opened = self.open_blob(record, start).await?;
            return Ok(self.copier.window_stream(opened.reader, 0, len));
        }

        let wrapped = record.encryption.wrapped_key().ok_or_else(|| {
            VaultError::DecryptionFailed(format!("object {} has no wrapped key", record.id))
        })?;
        let key = self.envelope()?.unwrap(wrapped)?;
        let chunk_size = usize::try_from(record.chunk_size)
            .map_err(|_| VaultError::DecryptionFailed("chunk size out of range".into()))?;
        let layout = ChunkLayout::new(chunk_size)?;
        let pos = layout.locate(start);

        let opened = self.open_blob(record, pos.cipher_offset).await?;
        tracing::debug!(
            object = %record.id,
            start,
            len,
            frame = pos.index,
            skip = pos.skip,
            "encrypted window"
        );
        let plain = decrypt_stream(opened.reader, self.engine.clone(), key, chunk_size)?;
        Ok(self.copier.window_stream(stream_reader(plain), pos.skip, len))
    }

    async fn open_blob(&self, record: &ObjectRecord, offset: u64) -> VaultResult<OpenedBlob> {
        match self.store.open_read(record.blob_id.as_str(), offset).await {
            Ok(opened) => Ok(opened),
            Err(StorageError::NotFound(blob)) => {
                // diagnostic only; the outcome stays 404
                let report = self.store.diagnose(&blob).await;
                tracing::warn!(
                    object = %record.id,
                    blob = %blob,
                    strategies = report.findings.len(),
                    "blob missing for catalogued object"
                );
                Err(VaultError::ResourceNotFound(format!(
                    "content for object {}",
                    record.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count a view. Failures are logged, never surfaced to the client.
    pub async fn record_view(&self, id: &str) {
        match self.catalog.write().await.increment_views(id) {
            Ok(Some(count)) => tracing::debug!(object = id, count, "view recorded"),
            Ok(None) => {}
            Err(e) => tracing::warn!(object = id, "failed to record view: {e:#}"),
        }
    }

    pub async fn info(&self, id: &str) -> VaultResult<ObjectInfo> {
        let record = self.get(id).await?;
        let encrypted = record.encryption.is_encrypted;
        Ok(ObjectInfo {
            id: record.id.to_string(),
            filename: record.metadata.original_filename,
            content_type: record.metadata.content_type,
            size: record.metadata.size,
            supports_range_requests: true,
            chunk_size: if encrypted {
                record.chunk_size
            } else {
                self.settings.chunk_size as u64
            },
            encrypted,
            view_count: record.view_count,
        })
    }

    /// Run every id resolver for the object's blob (or for `id` itself when
    /// the catalog does not know it).
    pub async fn diagnose(&self, id: &str) -> Diagnosis {
        let record = self.catalog.read().await.get(id).cloned();
        let blob_id = record
            .as_ref()
            .map(|r| r.blob_id.to_string())
            .unwrap_or_else(|| id.to_string());
        let report = self.store.diagnose(&blob_id).await;
        Diagnosis {
            object_id: id.to_string(),
            in_catalog: record.is_some(),
            blob_id,
            report,
        }
    }

    pub async fn delete(&self, id: &str) -> VaultResult<()> {
        let record = self.get(id).await?;
        match self.store.delete(record.blob_id.as_str()).await {
            Ok(()) => {}
            Err(StorageError::NotFound(blob)) => {
                tracing::warn!(object = id, blob = %blob, "blob already gone, dropping record")
            }
            Err(e) => return Err(e.into()),
        }
        self.catalog.write().await.remove(id)?;
        tracing::info!(object = id, "object deleted");
        Ok(())
    }
}

/// Count bytes flowing through `body` and fail once `max` is exceeded.
fn limit_body(body: ByteStream, max: u64, counter: Arc<AtomicU64>) -> ByteStream {
    Box::pin(body.map(move |chunk| {
        let chunk = chunk?;
        let total = counter.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
        if total > max {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("upload exceeds {max} bytes"),
            ));
        }
        Ok(chunk)
    }))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
