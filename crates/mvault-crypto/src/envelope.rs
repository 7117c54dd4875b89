//! Key wrapping: per-object data keys encrypted under the master wrapping key
//!
//! Wrapped key format (base64 of):
//! ```text
//! [16 bytes: random IV][AES-CBC ciphertext of the raw data key]
//! ```
//!
//! The wrapping key is SHA-256 of the master secret, truncated to the
//! engine's key length. Rotating the master secret orphans every object
//! wrapped under the old one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mvault_core::config::MasterSecret;
use mvault_core::types::WrappedKey;
use zeroize::Zeroize;

use crate::cipher::{padded_len, CipherEngine};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::IV_SIZE;

/// Wraps and unwraps data keys under one master secret.
pub struct KeyEnvelope {
    engine: CipherEngine,
    wrapping_key: SymmetricKey,
}

impl KeyEnvelope {
    pub fn new(engine: CipherEngine, master: &MasterSecret) -> CryptoResult<Self> {
        if master.is_empty() {
            return Err(CryptoError::encryption("master secret is empty"));
        }
        let wrapping_key = engine.derive_wrapping_key(master.expose())?;
        Ok(Self {
            engine,
            wrapping_key,
        })
    }

    pub fn engine(&self) -> &CipherEngine {
        &self.engine
    }

    /// Encrypt the raw bytes of `key` and base64 encode the payload.
    pub fn wrap(&self, key: &SymmetricKey) -> CryptoResult<WrappedKey> {
        let payload = self
            .engine
            .encrypt_bytes(key.as_bytes(), &self.wrapping_key)?;
        Ok(WrappedKey(BASE64.encode(payload)))
    }

    /// Reverse of [`wrap`](Self::wrap). Fails with `DecryptionFailed` on a
    /// bad encoding, the wrong master secret, or a key of the wrong size.
    pub fn unwrap(&self, wrapped: &WrappedKey) -> CryptoResult<SymmetricKey> {
        let payload = BASE64
            .decode(wrapped.as_str().trim())
            .map_err(|e| CryptoError::decryption(format!("wrapped key is not base64: {e}")))?;

        let expected = IV_SIZE + padded_len(self.engine.key_len());
        if payload.len() != expected {
            return Err(CryptoError::decryption(format!(
                "wrapped key has wrong size: {} bytes (expected {expected})",
                payload.len()
            )));
        }

        let mut raw = self
            .engine
            .decrypt_bytes(&payload, &self.wrapping_key)
            .map_err(|_| {
                CryptoError::decryption("key unwrapping failed: wrong master secret or corrupted key")
            })?;

        if raw.len() != self.engine.key_len() {
            let len = raw.len();
            raw.zeroize();
            return Err(CryptoError::decryption(format!(
                "unwrapped key has wrong size: {len} bytes (expected {})",
                self.engine.key_len()
            )));
        }

        SymmetricKey::from_bytes(raw)
    }
}

impl std::fmt::Debug for KeyEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEnvelope")
            .field("engine", &self.engine)
            .field("wrapping_key", &"[REDACTED]")
            .finish()
    }
}

/// Wrap `key` under `master_secret` without keeping an envelope around.
pub fn wrap_key(
    engine: &CipherEngine,
    key: &SymmetricKey,
    master_secret: &str,
) -> CryptoResult<WrappedKey> {
    KeyEnvelope::new(engine.clone(), &MasterSecret::new(master_secret))?.wrap(key)
}

/// Unwrap `wrapped` under `master_secret` without keeping an envelope around.
pub fn unwrap_key(
    engine: &CipherEngine,
    wrapped: &WrappedKey,
    master_secret: &str,
) -> CryptoResult<SymmetricKey> {
    KeyEnvelope::new(engine.clone(), &MasterSecret::new(master_secret))?.unwrap(wrapped)
}
