//! Single-shot whole-object encryption on a background worker
//!
//! The returned [`CipherTask`] resolves once the job finishes. Dropping the
//! handle does not stop the job; it runs to completion or failure.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::cipher::{CipherEngine, CipherText};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;

/// Handle to a running encrypt/decrypt job
pub struct CipherTask<T> {
    handle: JoinHandle<CryptoResult<T>>,
}

impl<T> CipherTask<T> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for CipherTask<T> {
    type Output = CryptoResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|e| Err(join_failed(e))))
    }
}

fn join_failed(e: tokio::task::JoinError) -> CryptoError {
    CryptoError::encryption_with("cipher worker terminated", e)
}

/// Read `source` to the end, then encrypt it in one piece under `key`.
pub fn encrypt_object<R>(engine: CipherEngine, mut source: R, key: SymmetricKey) -> CipherTask<CipherText>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let handle = tokio::spawn(async move {
        let mut plaintext = Vec::new();
        source.read_to_end(&mut plaintext).await?;
        let len = plaintext.len();
        let ct = tokio::task::spawn_blocking(move || engine.encrypt(&plaintext, &key))
            .await
            .map_err(join_failed)??;
        tracing::debug!(plain = len, cipher = ct.bytes.len(), "object encrypted");
        Ok::<_, CryptoError>(ct)
    });
    CipherTask { handle }
}

/// Decrypt a whole-object payload on the blocking pool.
pub fn decrypt_object(engine: CipherEngine, cipher_text: CipherText) -> CipherTask<Vec<u8>> {
    let handle = tokio::task::spawn_blocking(move || engine.decrypt(&cipher_text));
    CipherTask { handle }
}
