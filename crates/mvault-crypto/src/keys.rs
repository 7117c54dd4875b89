//! Symmetric keys: generation, base64 interchange, master-secret derivation

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

/// Valid AES key lengths in bytes
pub const AES_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Raw AES key material. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    /// Wrap raw key bytes; the length must be a valid AES key length.
    pub fn from_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if !AES_KEY_LENGTHS.contains(&bytes.len()) {
            let len = bytes.len();
            let mut bytes = bytes;
            bytes.zeroize();
            return Err(CryptoError::encryption(format!(
                "invalid key length: {len} bytes (expected 16, 24 or 32)"
            )));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Key size in bits
    pub fn bits(&self) -> u32 {
        (self.bytes.len() * 8) as u32
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::encryption_with("invalid key encoding", e))?;
        Self::from_bytes(bytes)
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SymmetricKey {}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bits", &self.bits())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random key of `len` bytes from the thread-local CSPRNG.
pub fn generate_key(len: usize) -> CryptoResult<SymmetricKey> {
    if !AES_KEY_LENGTHS.contains(&len) {
        return Err(CryptoError::encryption(format!(
            "cannot generate a {len}-byte AES key"
        )));
    }
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    SymmetricKey::from_bytes(bytes)
}

/// Derive the wrapping key from the master secret: SHA-256 over its UTF-8
/// bytes, truncated to `len`. Deterministic, so the wrapping key itself
/// never needs to be stored.
pub fn derive_wrapping_key(master_secret: &str, len: usize) -> CryptoResult<SymmetricKey> {
    if !AES_KEY_LENGTHS.contains(&len) {
        return Err(CryptoError::encryption(format!(
            "cannot derive a {len}-byte AES key"
        )));
    }
    let mut digest = Sha256::digest(master_secret.as_bytes());
    let key = SymmetricKey::from_bytes(digest[..len].to_vec());
    digest.as_mut_slice().zeroize();
    key
}
