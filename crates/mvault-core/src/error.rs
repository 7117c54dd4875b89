use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Boundary error taxonomy. Library crates convert their own errors into
/// this type; the daemon maps it onto HTTP responses.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("requested range not satisfiable for length {total}")]
    RangeNotSatisfiable { total: u64 },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// HTTP status code this error surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            VaultError::RangeNotSatisfiable { .. } => 416,
            VaultError::ResourceNotFound(_) => 404,
            VaultError::Validation(_) => 400,
            VaultError::Encryption(_)
            | VaultError::DecryptionFailed(_)
            | VaultError::Config(_)
            | VaultError::Storage(_)
            | VaultError::Io(_)
            | VaultError::Other(_) => 500,
        }
    }

    /// Short, stable name used in client-facing error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::RangeNotSatisfiable { .. } => "Range Not Satisfiable",
            VaultError::ResourceNotFound(_) => "Resource Not Found",
            VaultError::Encryption(_) => "Encryption Error",
            VaultError::DecryptionFailed(_) => "Decryption Failed",
            VaultError::Validation(_) => "Validation Error",
            VaultError::Config(_) => "Configuration Error",
            VaultError::Storage(_) => "Storage Error",
            VaultError::Io(_) => "I/O Failure",
            VaultError::Other(_) => "Internal Server Error",
        }
    }

    /// Message safe to hand to a client. Internal causes stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            VaultError::RangeNotSatisfiable { .. }
            | VaultError::ResourceNotFound(_)
            | VaultError::Validation(_) => self.to_string(),
            VaultError::Encryption(_) | VaultError::DecryptionFailed(_) => {
                "failed to process encrypted content".into()
            }
            _ => "an unexpected error occurred".into(),
        }
    }
}
