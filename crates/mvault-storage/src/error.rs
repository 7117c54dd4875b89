use mvault_core::VaultError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] opendal::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classify a backend error, turning OpenDAL's `NotFound` into ours.
    pub fn from_backend(err: opendal::Error, what: &str) -> Self {
        if err.kind() == opendal::ErrorKind::NotFound {
            StorageError::NotFound(what.to_string())
        } else {
            StorageError::Backend(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<StorageError> for VaultError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => VaultError::ResourceNotFound(format!("blob {id}")),
            StorageError::Backend(e) => VaultError::Storage(e.to_string()),
            StorageError::Io(e) => VaultError::Io(e),
        }
    }
}
