//! Bounded copy from a blob reader to a response sink
//!
//! At most one buffer of `buf_size` bytes is held at a time, so a slow
//! consumer backpressures the source instead of growing memory.

use bytes::Bytes;
use futures::stream;
use mvault_core::types::ByteStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Default copy buffer (8 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Copies a window of a source into a sink through a fixed-size buffer.
#[derive(Debug, Clone, Copy)]
pub struct StreamCopier {
    buf_size: usize,
}

impl Default for StreamCopier {
    fn default() -> Self {
        Self {
            buf_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl StreamCopier {
    pub fn new(buf_size: usize) -> Self {
        Self {
            buf_size: buf_size.max(1),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Discard `skip` bytes of `source`, then copy up to `limit` bytes into
    /// `sink`. Returns the number of bytes written, which is less than
    /// `limit` only when the source ends first. The sink is flushed on every
    /// exit path.
    pub async fn copy<R, W>(
        &self,
        source: &mut R,
        sink: &mut W,
        skip: u64,
        limit: u64,
    ) -> std::io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.buf_size];
        let result = copy_window(source, sink, &mut buf, skip, limit).await;
        let flushed = sink.flush().await;

        match (result, flushed) {
            (Ok(written), Ok(())) => Ok(written),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Streaming form of [`copy`](Self::copy): a lazy stream of the windowed
    /// bytes. Each poll reads at most one buffer from `source`, so nothing
    /// is read ahead of the consumer. Read errors are yielded, not swallowed.
    pub fn window_stream<R>(&self, source: R, skip: u64, limit: u64) -> ByteStream
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let state = Window {
            source,
            buf: vec![0u8; self.buf_size],
            skip,
            remaining: limit,
            limit,
        };

        Box::pin(stream::try_unfold(state, |mut st| async move {
            while st.skip > 0 {
                let want = st.skip.min(st.buf.len() as u64) as usize;
                let n = st.source.read(&mut st.buf[..want]).await?;
                if n == 0 {
                    tracing::warn!(skip = st.skip, "source ended inside the skipped prefix");
                    return Ok(None);
                }
                st.skip -= n as u64;
            }
            if st.remaining == 0 {
                return Ok(None);
            }

            let want = st.remaining.min(st.buf.len() as u64) as usize;
            let n = st.source.read(&mut st.buf[..want]).await?;
            if n == 0 {
                tracing::warn!(
                    written = st.limit - st.remaining,
                    limit = st.limit,
                    "source ended before the requested window"
                );
                return Ok(None);
            }
            st.remaining -= n as u64;
            let chunk = Bytes::copy_from_slice(&st.buf[..n]);
            Ok::<_, std::io::Error>(Some((chunk, st)))
        }))
    }
}

struct Window<R> {
    source: R,
    buf: Vec<u8>,
    skip: u64,
    remaining: u64,
    limit: u64,
}

async fn copy_window<R, W>(
    source: &mut R,
    sink: &mut W,
    buf: &mut [u8],
    skip: u64,
    limit: u64,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut remaining_skip = skip;
    while remaining_skip > 0 {
        let want = remaining_skip.min(buf.len() as u64) as usize;
        let n = source.read(&mut buf[..want]).await?;
        if n == 0 {
            return Ok(0);
        }
        remaining_skip -= n as u64;
    }

    let mut written = 0u64;
    while written < limit {
        let want = (limit - written).min(buf.len() as u64) as usize;
        let n = source.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    Ok(written)
}

/// Adapt a byte stream into a reader the copier can consume.
pub fn stream_reader(stream: ByteStream) -> StreamReader<ByteStream, Bytes> {
    StreamReader::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    /// Reader that hands out at most `step` bytes per read
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let n = self.step.min(buf.remaining()).min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    /// Sink that records whether it was flushed
    #[derive(Default)]
    struct FlushTracker {
        data: Vec<u8>,
        flushed: bool,
    }

    impl AsyncWrite for FlushTracker {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            self.flushed = true;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_skip_and_limit() {
        let data = source(1000);
        let mut sink = FlushTracker::default();

        let n = StreamCopier::default()
            .copy(&mut data.as_slice(), &mut sink, 50, 10)
            .await
            .unwrap();

        assert_eq!(n, 10);
        assert_eq!(sink.data, &data[50..60]);
        assert!(sink.flushed);
    }

    #[tokio::test]
    async fn test_limit_past_end_is_not_an_error() {
        let data = source(1000);
        let mut sink = FlushTracker::default();

        let n = StreamCopier::default()
            .copy(&mut data.as_slice(), &mut sink, 990, 100)
            .await
            .unwrap();

        assert_eq!(n, 10);
        assert_eq!(sink.data, &data[990..]);
        assert!(sink.flushed, "flush must happen on early exhaustion");
    }

    #[tokio::test]
    async fn test_skip_past_end() {
        let data = source(100);
        let mut sink = FlushTracker::default();

        let n = StreamCopier::default()
            .copy(&mut data.as_slice(), &mut sink, 500, 10)
            .await
            .unwrap();

        assert_eq!(n, 0);
        assert!(sink.data.is_empty());
        assert!(sink.flushed);
    }

    #[tokio::test]
    async fn test_partial_reads_are_looped() {
        let data = source(5000);
        let mut reader = Trickle {
            data: data.clone(),
            pos: 0,
            step: 7,
        };
        let mut sink = FlushTracker::default();

        let n = StreamCopier::new(64)
            .copy(&mut reader, &mut sink, 1234, 2000)
            .await
            .unwrap();

        assert_eq!(n, 2000);
        assert_eq!(sink.data, &data[1234..3234]);
    }

    #[tokio::test]
    async fn test_window_stream() {
        let data = source(100_000);
        let copier = StreamCopier::new(4096);

        let out: Vec<Bytes> = copier
            .window_stream(std::io::Cursor::new(data.clone()), 12_345, 50_000)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(out.concat(), &data[12_345..62_345]);
        assert!(out.iter().all(|chunk| chunk.len() <= 4096));
    }

    #[tokio::test]
    async fn test_stream_reader_source() {
        let parts: Vec<std::io::Result<Bytes>> = (0..10u8)
            .map(|i| Ok(Bytes::from(vec![i; 100])))
            .collect();
        let stream: ByteStream = Box::pin(futures::stream::iter(parts));

        let out: Vec<Bytes> = StreamCopier::new(64)
            .window_stream(stream_reader(stream), 150, 300)
            .try_collect()
            .await
            .unwrap();
        let out = out.concat();
        assert_eq!(out.len(), 300);
        assert_eq!(out[0], 1);
        assert_eq!(out[299], 4);
    }

    /// Reader that hands out `data` and then fails
    struct FailAfter {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for FailAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos == self.data.len() {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "bad padding",
                )));
            }
            let n = buf.remaining().min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_window_stream_surfaces_read_errors() {
        let reader = FailAfter {
            data: source(100),
            pos: 0,
        };
        let result: std::io::Result<Vec<Bytes>> = StreamCopier::new(32)
            .window_stream(reader, 10, 500)
            .try_collect()
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_window_stream_error_during_skip() {
        let reader = FailAfter {
            data: source(5),
            pos: 0,
        };
        let result: std::io::Result<Vec<Bytes>> = StreamCopier::new(32)
            .window_stream(reader, 50, 10)
            .try_collect()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_window_stream_is_lazy() {
        let data = source(1000);
        let mut stream =
            StreamCopier::new(100).window_stream(std::io::Cursor::new(data.clone()), 0, 1000);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(&first[..], &data[..100]);
    }
}
