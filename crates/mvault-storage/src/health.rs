//! Storage health check

use opendal::Operator;

use crate::error::{StorageError, StorageResult};

/// Verify the storage backend is reachable by listing the root
pub async fn check_health(op: &Operator) -> StorageResult<()> {
    // A list on the root is the lightest check every service supports
    op.list("/").await.map(|_| ()).map_err(|e| {
        tracing::warn!("storage health check failed: {e}");
        StorageError::Backend(e)
    })
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}
