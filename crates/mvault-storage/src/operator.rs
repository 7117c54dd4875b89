//! OpenDAL Operator factory for mediavault storage backends

use anyhow::{Context, Result};
use mvault_core::config::{StorageBackend, StorageConfig};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};

/// Environment variables the S3 credentials are read from
pub const ACCESS_KEY_ENV: &str = "MVAULT_S3_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "MVAULT_S3_SECRET_ACCESS_KEY";

/// S3 credentials. The secret half is redacted in `Debug`.
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl S3Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
        }
    }

    /// Read credentials from `MVAULT_S3_ACCESS_KEY_ID` / `MVAULT_S3_SECRET_ACCESS_KEY`.
    pub fn from_env() -> Option<Self> {
        let access = std::env::var(ACCESS_KEY_ENV).ok()?;
        let secret = std::env::var(SECRET_KEY_ENV).ok()?;
        Some(Self::new(access, secret))
    }
}

/// Build an OpenDAL Operator for the configured backend.
///
/// For S3, if `enforce_tls` is true and the endpoint uses HTTP, this returns
/// an error. Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_operator(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    let op = match cfg.backend {
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        StorageBackend::Fs => {
            let root = cfg
                .root
                .to_str()
                .context("storage.root is not valid UTF-8")?;
            Operator::new(opendal::services::Fs::default().root(root))
                .context("creating OpenDAL fs operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
        StorageBackend::S3 => build_s3(cfg, creds)?,
    };
    tracing::debug!(backend = ?cfg.backend, prefix = %cfg.prefix, "storage operator ready");
    Ok(op)
}

fn build_s3(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let mut builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket);
    if let Some(creds) = creds {
        builder = builder
            .access_key_id(&creds.access_key_id)
            .secret_access_key(creds.secret_access_key.expose_secret());
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3(endpoint: &str, enforce_tls: bool) -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::S3,
            endpoint: endpoint.into(),
            enforce_tls,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_memory_and_fs() {
        let cfg = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(build_operator(&cfg, None).is_ok());

        let dir = tempfile::tempdir().unwrap();
        let cfg = StorageConfig {
            backend: StorageBackend::Fs,
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_operator(&cfg, None).is_ok());
    }

    #[test]
    fn test_s3_http_warning() {
        // HTTP endpoint with enforce_tls=false should succeed (but log warning)
        let creds = S3Credentials::new("key", "secret");
        assert!(build_operator(&s3("http://localhost:9000", false), Some(&creds)).is_ok());
    }

    #[test]
    fn test_s3_http_enforce_tls() {
        let result = build_operator(&s3("http://insecure:9000", true), None);
        assert!(result.is_err(), "HTTP + enforce_tls must fail");
        assert!(
            result.unwrap_err().to_string().contains("enforce_tls"),
            "error message should mention enforce_tls"
        );
    }

    #[test]
    fn test_s3_https() {
        let creds = S3Credentials::new("key", "secret");
        assert!(build_operator(&s3("https://s3.example.com", true), Some(&creds)).is_ok());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = S3Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("AKIDEXAMPLE"));
        assert!(!dbg.contains("wJalrXUtnFEMI"));
    }
}
