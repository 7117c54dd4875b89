use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Environment variable that overrides `crypto.master_secret`
pub const MASTER_SECRET_ENV: &str = "MVAULT_MASTER_SECRET";

/// Shortest master secret accepted without a warning
pub const MIN_MASTER_SECRET_LEN: usize = 32;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address for the object API (default: 127.0.0.1:8080)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    Memory,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which OpenDAL service backs the blob store
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Key prefix every blob is stored under
    pub prefix: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket name
    pub bucket: String,
    /// Refuse plaintext HTTP S3 endpoints
    pub enforce_tls: bool,
}

/// Cipher configuration. Defaults reproduce AES-256 in CBC mode with
/// PKCS#5/PKCS#7 padding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Block cipher family (only "AES")
    pub algorithm: String,
    /// Key size in bits: 128, 192 or 256
    pub key_size: u32,
    /// Cipher transformation string
    pub transformation: String,
    /// Root secret all per-object keys are wrapped under
    #[serde(skip_serializing)]
    pub master_secret: Option<MasterSecret>,
    /// Plaintext bytes per independently encrypted chunk (default: 1 MiB)
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Buffer used when copying blob bytes to a client (default: 8 KiB)
    pub copy_buffer_size: usize,
    /// Largest accepted upload body
    pub max_upload_bytes: u64,
    /// JSON file the object catalog is persisted to
    pub catalog_path: PathBuf,
}

/// The process-wide master secret. Redacted in `Debug`, never serialized.
pub struct MasterSecret(SecretString);

impl MasterSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl Clone for MasterSecret {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_owned())
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for MasterSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(MasterSecret::new)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("/var/lib/mediavault/blobs"),
            prefix: "objects".into(),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "mediavault".into(),
            enforce_tls: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            algorithm: "AES".into(),
            key_size: 256,
            transformation: "AES/CBC/PKCS5Padding".into(),
            master_secret: None,
            chunk_size: 1024 * 1024,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            copy_buffer_size: 8 * 1024,
            max_upload_bytes: 5 * 1024 * 1024 * 1024,
            catalog_path: PathBuf::from("/var/lib/mediavault/catalog.json"),
        }
    }
}

impl CryptoConfig {
    /// Reject settings the cipher engine cannot honor.
    pub fn validate(&self) -> VaultResult<()> {
        if !self.algorithm.eq_ignore_ascii_case("AES") {
            return Err(VaultError::Config(format!(
                "unsupported algorithm {:?} (only AES)",
                self.algorithm
            )));
        }
        if !matches!(self.key_size, 128 | 192 | 256) {
            return Err(VaultError::Config(format!(
                "unsupported key size {} bits (expected 128, 192 or 256)",
                self.key_size
            )));
        }
        let t = self.transformation.to_ascii_uppercase();
        if t != "AES/CBC/PKCS5PADDING" && t != "AES/CBC/PKCS7PADDING" {
            return Err(VaultError::Config(format!(
                "unsupported transformation {:?}",
                self.transformation
            )));
        }
        if self.chunk_size == 0 {
            return Err(VaultError::Config("crypto.chunk_size must be > 0".into()));
        }
        Ok(())
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        (self.key_size / 8) as usize
    }

    /// Apply the `MVAULT_MASTER_SECRET` override, if set.
    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(MASTER_SECRET_ENV) {
            if !secret.is_empty() {
                self.master_secret = Some(MasterSecret::new(secret));
            }
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> VaultResult<()> {
        if self.copy_buffer_size == 0 {
            return Err(VaultError::Config(
                "streaming.copy_buffer_size must be > 0".into(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(VaultError::Config(
                "streaming.max_upload_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl VaultConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> VaultResult<Self> {
        toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults if the file is missing,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> VaultResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                VaultError::Config(format!("reading config {}: {e}", path.display()))
            })?;
            Self::from_toml(&content).map_err(|e| {
                VaultError::Config(format!("parsing config {}: {e}", path.display()))
            })?
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Self::default()
        };
        config.crypto.apply_env();
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        self.crypto.validate()?;
        self.streaming.validate()?;
        if let Some(secret) = &self.crypto.master_secret {
            if secret.len() < MIN_MASTER_SECRET_LEN {
                tracing::warn!(
                    min = MIN_MASTER_SECRET_LEN,
                    "master secret is shorter than recommended"
                );
            }
        }
        Ok(())
    }
}
