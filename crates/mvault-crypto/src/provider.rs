//! One-time cipher self test, run at process startup
//!
//! `ensure_initialized` encrypts the NIST SP 800-38A CBC-AES256 vector and
//! compares the first ciphertext block. The outcome is computed once and
//! cached; later calls return the cached result.

use std::sync::OnceLock;

use crate::cipher::encrypt_with_iv;
use crate::error::{CryptoError, CryptoResult};

static SELF_TEST: OnceLock<Result<(), String>> = OnceLock::new();

const KAT_KEY: [u8; 32] = [
    0x60, 0x3d, 0xeb, 0x10, 0x15, 0xca, 0x71, 0xbe, 0x2b, 0x73, 0xae, 0xf0, 0x85, 0x7d, 0x77,
    0x81, 0x1f, 0x35, 0x2c, 0x07, 0x3b, 0x61, 0x08, 0xd7, 0x2d, 0x98, 0x10, 0xa3, 0x09, 0x14,
    0xdf, 0xf4,
];
const KAT_IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
    0x0f,
];
const KAT_PLAINTEXT: [u8; 16] = [
    0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17,
    0x2a,
];
const KAT_CIPHERTEXT: [u8; 16] = [
    0xf5, 0x8c, 0x4c, 0x04, 0xd6, 0xe5, 0xf1, 0xba, 0x77, 0x9e, 0xab, 0xfb, 0x5f, 0x7b, 0xfb,
    0xd6,
];

/// Run the cipher self test once per process. Idempotent.
pub fn ensure_initialized() -> CryptoResult<()> {
    SELF_TEST
        .get_or_init(|| {
            let result = known_answer_test();
            match &result {
                Ok(()) => tracing::debug!("AES-CBC self test passed"),
                Err(e) => tracing::error!("AES-CBC self test failed: {e}"),
            }
            result
        })
        .clone()
        .map_err(CryptoError::encryption)
}

/// Whether the self test has already run (successfully or not)
pub fn is_initialized() -> bool {
    SELF_TEST.get().is_some()
}

fn known_answer_test() -> Result<(), String> {
    let out = encrypt_with_iv(&KAT_KEY, &KAT_IV, &KAT_PLAINTEXT).map_err(|e| e.to_string())?;
    // one data block plus one full padding block
    if out.len() != 32 {
        return Err(format!("unexpected ciphertext length {}", out.len()));
    }
    if out[..16] != KAT_CIPHERTEXT {
        return Err("ciphertext does not match the known answer".into());
    }
    Ok(())
}
