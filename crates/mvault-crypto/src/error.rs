use mvault_core::VaultError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Cipher failures. Initialization, key-encoding and algorithm problems all
/// collapse into `Encryption`; bad padding or a wrong key is
/// `DecryptionFailed`. Neither variant ever carries plaintext.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("{message}")]
    Encryption {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
            source: None,
        }
    }

    pub fn encryption_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Encryption {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        Self::DecryptionFailed(message.into())
    }
}

impl From<CryptoError> for std::io::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(e) => e,
            CryptoError::DecryptionFailed(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
            CryptoError::Encryption { .. } => std::io::Error::other(err),
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Io(e) => VaultError::Io(e),
            CryptoError::DecryptionFailed(msg) => VaultError::DecryptionFailed(msg),
            CryptoError::Encryption { message, source } => match source {
                Some(source) => VaultError::Encryption(format!("{message}: {source}")),
                None => VaultError::Encryption(message),
            },
        }
    }
}

/// Recover a cipher error that travelled through an `io::Error` (streams
/// surface failures as I/O errors).
pub fn cipher_error_in(err: &std::io::Error) -> Option<&CryptoError> {
    err.get_ref().and_then(|inner| inner.downcast_ref::<CryptoError>())
}
