//! Chunked cipher streams for payloads too large to hold in memory
//!
//! The plaintext is cut into fixed-size chunks and each chunk is encrypted
//! independently, so every chunk is also a cipher frame:
//! ```text
//! frame i = [16 bytes: IV_i][AES-CBC(chunk_i), PKCS#7 padded]
//! ```
//! A full chunk of `C` bytes always yields a frame of `16 + (C/16 + 1)*16`
//! bytes; only the last frame may be shorter. Decryption must use the same
//! `C` the object was encrypted with, which is why the catalog records it.
//!
//! Both directions are pull-based: a frame is read and transformed only when
//! the consumer polls for it, so at most one chunk is buffered at a time.

use bytes::Bytes;
use futures::stream;
use mvault_core::types::ByteStream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cipher::{padded_len, CipherEngine};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SymmetricKey;
use crate::IV_SIZE;

/// Encrypted frame length for a plaintext chunk of `chunk_len` bytes.
pub const fn encrypted_frame_len(chunk_len: usize) -> usize {
    IV_SIZE + padded_len(chunk_len)
}

/// Where a plaintext offset lands in the encrypted frame sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePosition {
    /// Zero-based frame (chunk) index
    pub index: u64,
    /// Byte offset of that frame in the encrypted blob
    pub cipher_offset: u64,
    /// Plaintext bytes to discard from the start of the decrypted frame
    pub skip: u64,
}

/// Frame arithmetic for one chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_size: usize,
}

impl ChunkLayout {
    pub fn new(chunk_size: usize) -> CryptoResult<Self> {
        if chunk_size == 0 {
            return Err(CryptoError::encryption("chunk size must be > 0"));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Length of a full encrypted frame
    pub fn frame_len(&self) -> usize {
        encrypted_frame_len(self.chunk_size)
    }

    /// Total encrypted length for a plaintext of `plain_len` bytes.
    /// An empty plaintext produces no frames at all.
    pub fn encrypted_len(&self, plain_len: u64) -> u64 {
        let c = self.chunk_size as u64;
        let full = plain_len / c;
        let rem = plain_len % c;
        let tail = if rem == 0 {
            0
        } else {
            encrypted_frame_len(rem as usize) as u64
        };
        full * self.frame_len() as u64 + tail
    }

    /// Map a plaintext offset to the frame that contains it.
    pub fn locate(&self, plain_offset: u64) -> FramePosition {
        let c = self.chunk_size as u64;
        let index = plain_offset / c;
        FramePosition {
            index,
            cipher_offset: index * self.frame_len() as u64,
            skip: plain_offset % c,
        }
    }
}

/// Encrypt one chunk into a frame.
pub fn encrypt_chunk(
    engine: &CipherEngine,
    key: &SymmetricKey,
    chunk: &[u8],
) -> CryptoResult<Vec<u8>> {
    engine.encrypt_bytes(chunk, key)
}

/// Decrypt one frame back into its chunk.
pub fn decrypt_chunk(
    engine: &CipherEngine,
    key: &SymmetricKey,
    frame: &[u8],
) -> CryptoResult<Vec<u8>> {
    engine.decrypt_bytes(frame, key)
}

struct FrameState<R> {
    reader: R,
    engine: CipherEngine,
    key: SymmetricKey,
    buf: Vec<u8>,
    index: u64,
    done: bool,
}

/// Lazily encrypt `source` in chunks of `chunk_size` plaintext bytes.
pub fn encrypt_stream<R>(
    source: R,
    engine: CipherEngine,
    key: SymmetricKey,
    chunk_size: usize,
) -> CryptoResult<ByteStream>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let layout = ChunkLayout::new(chunk_size)?;
    let state = FrameState {
        reader: source,
        engine,
        key,
        buf: vec![0u8; layout.chunk_size()],
        index: 0,
        done: false,
    };

    Ok(Box::pin(stream::try_unfold(state, |mut st| async move {
        if st.done {
            return Ok(None);
        }
        let n = read_full(&mut st.reader, &mut st.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < st.buf.len() {
            st.done = true;
        }
        let frame = encrypt_chunk(&st.engine, &st.key, &st.buf[..n])?;
        tracing::trace!(chunk = st.index, plain = n, cipher = frame.len(), "encrypted chunk");
        st.index += 1;
        Ok::<_, std::io::Error>(Some((Bytes::from(frame), st)))
    })))
}

/// Lazily decrypt a frame sequence produced by [`encrypt_stream`] with the
/// same `chunk_size`. `source` must start on a frame boundary.
pub fn decrypt_stream<R>(
    source: R,
    engine: CipherEngine,
    key: SymmetricKey,
    chunk_size: usize,
) -> CryptoResult<ByteStream>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let layout = ChunkLayout::new(chunk_size)?;
    let state = FrameState {
        reader: source,
        engine,
        key,
        buf: vec![0u8; layout.frame_len()],
        index: 0,
        done: false,
    };

    Ok(Box::pin(stream::try_unfold(state, |mut st| async move {
        if st.done {
            return Ok(None);
        }
        let n = read_full(&mut st.reader, &mut st.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < st.buf.len() {
            st.done = true;
        }
        let chunk = decrypt_chunk(&st.engine, &st.key, &st.buf[..n]).map_err(|e| {
            tracing::debug!(chunk = st.index, frame = n, "chunk decryption failed: {e}");
            std::io::Error::from(e)
        })?;
        st.index += 1;
        Ok::<_, std::io::Error>(Some((Bytes::from(chunk), st)))
    })))
}

/// Fill `buf` from `reader`, stopping early only at end of input.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
