//! Counting stream adapters.
//!
//! `ClientSink` wraps the client side of a connection. It counts response
//! bytes and remembers whether anything has been sent, which decides if a
//! late failure can still become an error page. `CountingReader` counts
//! bytes pulled from the origin.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, ReadBuf};

use crate::observability::ByteCounter;

/// Write half toward the client.
#[derive(Debug)]
pub struct ClientSink<W> {
    inner: W,
    written: ByteCounter,
    started: bool,
}

impl<W> ClientSink<W> {
    pub fn new(inner: W, written: ByteCounter) -> Self {
        Self {
            inner,
            written,
            started: false,
        }
    }

    /// True once any response byte reached the client.
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn bytes_written(&self) -> u64 {
        self.written.get()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ClientSink<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = polled {
            if n > 0 {
                this.started = true;
                this.written.add(n as u64);
            }
        }
        polled
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Read half from the origin, counting consumed bytes.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    read: ByteCounter,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, read: ByteCounter) -> Self {
        Self { inner, read }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            this.read.add((buf.filled().len() - before) as u64);
        }
        polled
    }
}

impl<R: AsyncBufRead + Unpin> AsyncBufRead for CountingReader<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        this.read.add(amt as u64);
        Pin::new(&mut this.inner).consume(amt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn sink_tracks_start_and_bytes() {
        let counter = ByteCounter::default();
        let mut sink = ClientSink::new(Vec::new(), counter.clone());
        assert!(!sink.started());
        sink.write_all(b"").await.unwrap();
        assert!(!sink.started());
        sink.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        assert!(sink.started());
        assert_eq!(counter.get(), 17);
        assert_eq!(sink.into_inner().len(), 17);
    }

    #[tokio::test]
    async fn reader_counts_buffered_and_direct_reads() {
        let counter = ByteCounter::default();
        let input: &[u8] = b"line one\nrest of body";
        let mut reader = CountingReader::new(BufReader::new(input), counter.clone());

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(counter.get(), 9);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(counter.get(), input.len() as u64);
    }
}
