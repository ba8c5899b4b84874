//! Origin response body framing.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, Take};

use crate::codec::ChunkedDecoder;
use crate::http::headers::HttpHeaders;

/// Logical body reader for a response.
///
/// Yields the payload with transfer framing removed, and EOF where the
/// body ends.
#[derive(Debug)]
pub enum OriginBody<R> {
    Chunked(ChunkedDecoder<R>),
    Length(Take<R>),
    UntilEof(R),
}

impl<R: AsyncBufRead + Unpin> OriginBody<R> {
    /// Frame `reader` according to `headers`. Chunked coding takes
    /// precedence over Content-Length.
    pub fn new(reader: R, headers: &HttpHeaders) -> Self {
        if headers.chunked {
            OriginBody::Chunked(ChunkedDecoder::new(reader))
        } else if let Some(len) = headers.content_length {
            OriginBody::Length(reader.take(len))
        } else {
            OriginBody::UntilEof(reader)
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, OriginBody::Chunked(_))
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for OriginBody<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OriginBody::Chunked(decoder) => Pin::new(decoder).poll_read(cx, buf),
            OriginBody::Length(take) => Pin::new(take).poll_read(cx, buf),
            OriginBody::UntilEof(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

/// Copy the raw bytes of a body, framing included, from `reader` to
/// `writer`: exactly `content_length` bytes when known and not chunked,
/// otherwise everything up to EOF.
pub async fn forward_raw<R, W>(reader: &mut R, writer: &mut W, headers: &HttpHeaders) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match headers.content_length {
        Some(len) if !headers.chunked => tokio::io::copy(&mut reader.take(len), writer).await?,
        _ => tokio::io::copy(reader, writer).await?,
    };
    writer.flush().await?;
    Ok(copied)
}
