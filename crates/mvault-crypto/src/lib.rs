//! mvault-crypto: envelope encryption for stored media objects
//!
//! Cipher: AES in CBC mode, PKCS#7 padding, fresh random 16-byte IV per call.
//! No authentication tag; tampering is only caught when padding breaks.
//!
//! Key hierarchy:
//! ```text
//! Master Secret (config / MVAULT_MASTER_SECRET)
//!   └── Wrapping Key = SHA-256(secret)[..key_len], never stored
//!         └── Data Key (per object, random, persisted only wrapped)
//!               └── Chunk frames: [IV][AES-CBC(chunk)] per `chunk_size` bytes
//! ```

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod provider;
pub mod stream;
pub mod task;

pub use cipher::{CipherEngine, CipherText, Transformation};
pub use envelope::{unwrap_key, wrap_key, KeyEnvelope};
pub use error::{cipher_error_in, CryptoError, CryptoResult};
pub use keys::{derive_wrapping_key, generate_key, SymmetricKey};
pub use stream::{decrypt_stream, encrypt_stream, ChunkLayout, FramePosition};
pub use task::{decrypt_object, encrypt_object, CipherTask};

/// Size of an AES-CBC initialization vector
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Default plaintext bytes per chunk frame (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
