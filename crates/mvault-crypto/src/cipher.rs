//! Single-shot AES-CBC encryption with a fresh random IV per call
//!
//! Payload format (binary, no length prefix):
//! ```text
//! [16 bytes: random IV][N bytes: AES-CBC ciphertext, PKCS#7 padded]
//! ```
//!
//! There is no authentication tag. A wrong key or tampered payload is only
//! detected when the padding check fails, and not always then.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use mvault_core::config::CryptoConfig;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{derive_wrapping_key, generate_key, SymmetricKey};
use crate::{BLOCK_SIZE, IV_SIZE};

/// Supported cipher transformations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    /// AES in CBC mode with PKCS#5/PKCS#7 padding
    AesCbcPkcs7,
}

impl Transformation {
    pub fn parse(name: &str) -> CryptoResult<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AES/CBC/PKCS5PADDING" | "AES/CBC/PKCS7PADDING" => Ok(Self::AesCbcPkcs7),
            _ => Err(CryptoError::encryption(format!(
                "unsupported transformation: {name}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AesCbcPkcs7 => "AES/CBC/PKCS5Padding",
        }
    }
}

impl std::fmt::Display for Transformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a single encryption call: `IV ‖ ciphertext`, the key it was
/// produced with, and the transformation name.
#[derive(Debug, Clone)]
pub struct CipherText {
    pub bytes: Vec<u8>,
    pub key: SymmetricKey,
    pub algorithm: String,
}

impl CipherText {
    /// The IV this payload was encrypted with
    pub fn iv(&self) -> Option<&[u8]> {
        self.bytes.get(..IV_SIZE)
    }
}

/// Configured AES engine. Cheap to clone; holds no key material.
#[derive(Debug, Clone)]
pub struct CipherEngine {
    transformation: Transformation,
    key_len: usize,
}

impl Default for CipherEngine {
    fn default() -> Self {
        Self {
            transformation: Transformation::AesCbcPkcs7,
            key_len: 32,
        }
    }
}

impl CipherEngine {
    pub fn new(config: &CryptoConfig) -> CryptoResult<Self> {
        if !config.algorithm.eq_ignore_ascii_case("AES") {
            return Err(CryptoError::encryption(format!(
                "unsupported algorithm: {}",
                config.algorithm
            )));
        }
        let key_len = match config.key_size {
            128 | 192 | 256 => config.key_len(),
            bits => {
                return Err(CryptoError::encryption(format!(
                    "unsupported key size: {bits} bits"
                )))
            }
        };
        Ok(Self {
            transformation: Transformation::parse(&config.transformation)?,
            key_len,
        })
    }

    pub fn transformation(&self) -> Transformation {
        self.transformation
    }

    /// Configured key length in bytes
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Generate a fresh random data key of the configured size.
    pub fn generate_key(&self) -> CryptoResult<SymmetricKey> {
        generate_key(self.key_len)
    }

    /// Derive the master wrapping key of the configured size.
    pub fn derive_wrapping_key(&self, master_secret: &str) -> CryptoResult<SymmetricKey> {
        derive_wrapping_key(master_secret, self.key_len)
    }

    /// Encrypt `plaintext` under `key` with a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<CipherText> {
        Ok(CipherText {
            bytes: self.encrypt_bytes(plaintext, key)?,
            key: key.clone(),
            algorithm: self.transformation.name().to_string(),
        })
    }

    /// Decrypt a `CipherText` with the key and transformation it carries.
    pub fn decrypt(&self, cipher_text: &CipherText) -> CryptoResult<Vec<u8>> {
        Transformation::parse(&cipher_text.algorithm)?;
        self.decrypt_bytes(&cipher_text.bytes, &cipher_text.key)
    }

    /// Encrypt and return the raw `IV ‖ ciphertext` payload.
    pub fn encrypt_bytes(&self, plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
        self.check_key(key)
            .map_err(CryptoError::encryption)?;

        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = cbc_encrypt(key.as_bytes(), &iv, plaintext)?;

        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a raw `IV ‖ ciphertext` payload.
    pub fn decrypt_bytes(&self, payload: &[u8], key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
        self.check_key(key).map_err(CryptoError::decryption)?;

        if payload.len() < IV_SIZE + BLOCK_SIZE {
            return Err(CryptoError::decryption(format!(
                "payload too short: {} bytes (minimum {})",
                payload.len(),
                IV_SIZE + BLOCK_SIZE
            )));
        }
        let (iv, ciphertext) = payload.split_at(IV_SIZE);
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::decryption(format!(
                "ciphertext length {} is not a multiple of the block size",
                ciphertext.len()
            )));
        }

        cbc_decrypt(key.as_bytes(), iv, ciphertext)
    }

    fn check_key(&self, key: &SymmetricKey) -> Result<(), String> {
        if key.len() != self.key_len {
            return Err(format!(
                "key size mismatch: got {} bits, engine configured for {}",
                key.bits(),
                self.key_len * 8
            ));
        }
        Ok(())
    }
}

/// Ciphertext length (without IV) for `plaintext_len` bytes under PKCS#7.
pub const fn padded_len(plaintext_len: usize) -> usize {
    (plaintext_len / BLOCK_SIZE + 1) * BLOCK_SIZE
}

fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let init_err = |_| CryptoError::encryption("cipher initialization failed");
    let out = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(init_err)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(init_err)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(init_err)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => {
            return Err(CryptoError::encryption(format!(
                "invalid AES key length: {n}"
            )))
        }
    };
    Ok(out)
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    let init_err = |_| CryptoError::decryption("cipher initialization failed");
    let unpad_err = |_| CryptoError::decryption("invalid padding (wrong key or corrupted data)");
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(init_err)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad_err),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(init_err)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad_err),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(init_err)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(unpad_err),
        n => Err(CryptoError::decryption(format!(
            "invalid AES key length: {n}"
        ))),
    }
}

/// Encrypt with a caller-supplied IV. Only for known-answer self tests.
pub(crate) fn encrypt_with_iv(
    key: &[u8],
    iv: &[u8; IV_SIZE],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    cbc_encrypt(key, iv, plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn engine() -> CipherEngine {
        CipherEngine::new(&CryptoConfig::default()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let engine = engine();
        let key = engine.generate_key().unwrap();
        let plaintext = b"hello, encrypted media!";

        let ct = engine.encrypt(plaintext, &key).unwrap();
        let pt = engine.decrypt(&ct).unwrap();

        assert_eq!(pt, plaintext);
        assert_eq!(ct.algorithm, "AES/CBC/PKCS5Padding");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let engine = engine();
        let key = engine.generate_key().unwrap();

        let ct = engine.encrypt(b"", &key).unwrap();
        // IV + one full padding block
        assert_eq!(ct.bytes.len(), IV_SIZE + BLOCK_SIZE);
        assert_eq!(engine.decrypt(&ct).unwrap(), b"");
    }

    #[test]
    fn test_multi_megabyte_roundtrip() {
        let engine = engine();
        let key = engine.generate_key().unwrap();
        let data: Vec<u8> = (0u8..=255).cycle().take(3 * 1024 * 1024 + 5).collect();

        let ct = engine.encrypt(&data, &key).unwrap();
        assert_eq!(ct.bytes.len(), IV_SIZE + padded_len(data.len()));
        assert_eq!(engine.decrypt(&ct).unwrap(), data);
    }

    #[test]
    fn test_iv_is_fresh_per_call() {
        let engine = engine();
        let key = engine.generate_key().unwrap();
        let plaintext = b"identical plaintext";

        let a = engine.encrypt(plaintext, &key).unwrap();
        let b = engine.encrypt(plaintext, &key).unwrap();

        assert_ne!(a.bytes, b.bytes, "same plaintext must not repeat ciphertext");
        assert_ne!(a.iv(), b.iv());
        assert_eq!(engine.decrypt(&a).unwrap(), plaintext);
        assert_eq!(engine.decrypt(&b).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_wrong_key_fails_or_garbles() {
        let engine = engine();
        let key = engine.generate_key().unwrap();
        let other = engine.generate_key().unwrap();
        let plaintext = b"secret media bytes";

        let payload = engine.encrypt_bytes(plaintext, &key).unwrap();
        // CBC has no tag: a wrong key usually trips the padding check, but a
        // lucky padding byte can still "succeed" with garbage
        match engine.decrypt_bytes(&payload, &other) {
            Err(CryptoError::DecryptionFailed(_)) => {}
            Err(e) => panic!("unexpected error kind: {e}"),
            Ok(garbage) => assert_ne!(garbage, plaintext),
        }
    }

    #[test]
    fn test_key_size_mismatch_is_decryption_failure() {
        let engine = engine();
        let key = engine.generate_key().unwrap();
        let payload = engine.encrypt_bytes(b"data", &key).unwrap();

        let short = crate::keys::generate_key(16).unwrap();
        let err = engine.decrypt_bytes(&payload, &short).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));

        let err = engine.encrypt_bytes(b"data", &short).unwrap_err();
        assert!(matches!(err, CryptoError::Encryption { .. }));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let engine = engine();
        let key = engine.generate_key().unwrap();

        assert!(matches!(
            engine.decrypt_bytes(&[0u8; 10], &key),
            Err(CryptoError::DecryptionFailed(_))
        ));

        let mut payload = engine.encrypt_bytes(b"0123456789abcdef0123", &key).unwrap();
        payload.truncate(payload.len() - 3);
        assert!(matches!(
            engine.decrypt_bytes(&payload, &key),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_unsupported_transformation() {
        let engine = engine();
        let key = engine.generate_key().unwrap();
        let mut ct = engine.encrypt(b"x", &key).unwrap();
        ct.algorithm = "AES/GCM/NoPadding".into();
        assert!(matches!(
            engine.decrypt(&ct),
            Err(CryptoError::Encryption { .. })
        ));

        let config = CryptoConfig {
            transformation: "DES/ECB/NoPadding".into(),
            ..Default::default()
        };
        assert!(CipherEngine::new(&config).is_err());
    }

    #[test]
    fn test_smaller_key_sizes() {
        for bits in [128u32, 192] {
            let config = CryptoConfig {
                key_size: bits,
                ..Default::default()
            };
            let engine = CipherEngine::new(&config).unwrap();
            let key = engine.generate_key().unwrap();
            assert_eq!(key.bits(), bits);

            let payload = engine.encrypt_bytes(b"short key media", &key).unwrap();
            assert_eq!(engine.decrypt_bytes(&payload, &key).unwrap(), b"short key media");
        }
    }

    proptest! {
        #[test]
        fn encrypt_decrypt_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let engine = engine();
            let key = engine.generate_key().unwrap();
            let payload = engine.encrypt_bytes(&data, &key).unwrap();
            prop_assert_eq!(payload.len(), IV_SIZE + padded_len(data.len()));
            let out = engine.decrypt_bytes(&payload, &key).unwrap();
            prop_assert_eq!(out, data);
        }
    }
}
