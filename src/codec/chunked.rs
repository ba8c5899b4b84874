//! HTTP/1.1 chunked transfer coding.
//!
//! # Responsibilities
//! - Decode a chunked body into the plain payload as a pull-based reader
//! - Encode payload slices as chunks and terminate the body
//!
//! # Design Decisions
//! - The decoder is an `AsyncRead` over any `AsyncBufRead`, so the streaming
//!   gzip codec, the buffered loader and request-body relaying all consume
//!   the same implementation
//! - Chunk extensions and trailers are read and discarded
//! - EOF inside a chunk is an error, EOF inside the trailer section is not

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

const CRLF: &[u8; 2] = b"\r\n";
const LAST_CHUNK: &[u8; 5] = b"0\r\n\r\n";

/// Longest chunk-size or trailer line accepted.
const CHUNK_LINE_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Reading a `size[;ext]` line.
    Size,
    /// Copying chunk payload, bytes left in the current chunk.
    Data(u64),
    /// Reading the CRLF that follows a chunk payload.
    DataEnd,
    /// Reading trailer lines after the last chunk.
    Trailer,
    Done,
}

/// Reader yielding the payload of a chunked body.
///
/// Returns EOF once the terminal zero-size chunk and its trailer have been
/// consumed. Bytes after the body are left unread in the inner reader.
#[derive(Debug)]
pub struct ChunkedDecoder<R> {
    inner: R,
    state: State,
    line: Vec<u8>,
    decoded: u64,
}

impl<R: AsyncBufRead + Unpin> ChunkedDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: State::Size,
            line: Vec::new(),
            decoded: 0,
        }
    }

    /// True once the last chunk and the trailer have been read.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Payload bytes produced so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for ChunkedDecoder<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.state {
                State::Done => return Poll::Ready(Ok(())),
                State::Size => {
                    if !ready!(poll_line(&mut this.inner, &mut this.line, cx))? {
                        return Poll::Ready(Err(premature_end("chunk size")));
                    }
                    let size = parse_chunk_size(&this.line)?;
                    this.line.clear();
                    this.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data(size)
                    };
                }
                State::Data(remaining) => {
                    if out.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let available = ready!(Pin::new(&mut this.inner).poll_fill_buf(cx))?;
                    if available.is_empty() {
                        return Poll::Ready(Err(premature_end("chunk data")));
                    }
                    let n = available
                        .len()
                        .min(out.remaining())
                        .min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    out.put_slice(&available[..n]);
                    Pin::new(&mut this.inner).consume(n);

                    this.decoded += n as u64;
                    let left = remaining - n as u64;
                    this.state = if left == 0 {
                        State::DataEnd
                    } else {
                        State::Data(left)
                    };
                    return Poll::Ready(Ok(()));
                }
                State::DataEnd => {
                    if !ready!(poll_line(&mut this.inner, &mut this.line, cx))? {
                        return Poll::Ready(Err(premature_end("chunk terminator")));
                    }
                    if !trim_cr(&this.line).is_empty() {
                        tracing::debug!("Garbage after chunk payload ignored");
                    }
                    this.line.clear();
                    this.state = State::Size;
                }
                State::Trailer => {
                    // Lenient: a server closing right after "0\r\n" ends the body.
                    let complete = ready!(poll_line(&mut this.inner, &mut this.line, cx))?;
                    let blank = trim_cr(&this.line).is_empty();
                    this.line.clear();
                    if !complete || blank {
                        this.state = State::Done;
                    }
                }
            }
        }
    }
}

/// Accumulate bytes into `line` up to and excluding `\n`.
///
/// Resolves to `true` when a full line is available, `false` on EOF.
fn poll_line<R>(inner: &mut R, line: &mut Vec<u8>, cx: &mut Context<'_>) -> Poll<io::Result<bool>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = ready!(Pin::new(&mut *inner).poll_fill_buf(cx))?;
        if available.is_empty() {
            return Poll::Ready(Ok(false));
        }
        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                line.extend_from_slice(&available[..pos]);
                (pos + 1, true)
            }
            None => {
                line.extend_from_slice(available);
                (available.len(), false)
            }
        };
        Pin::new(&mut *inner).consume(used);

        if line.len() > CHUNK_LINE_LIMIT {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "chunk line too long",
            )));
        }
        if complete {
            return Poll::Ready(Ok(true));
        }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse the hex size in front of any `;extension`.
fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let line = trim_cr(line);
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(size).map(str::trim).unwrap_or_default();
    u64::from_str_radix(size, 16).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid chunk size line {:?}", String::from_utf8_lossy(line)),
        )
    })
}

fn premature_end(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("connection closed while reading {}", what),
    )
}

/// Frame `data` as one chunk. Empty input encodes to nothing, since an
/// empty chunk would end the body.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(data.len() + 12);
    out.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(CRLF);
    out
}

/// Write `data` as one chunk.
pub async fn write_chunk<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    writer.write_all(format!("{:X}\r\n", data.len()).as_bytes()).await?;
    writer.write_all(data).await?;
    writer.write_all(CRLF).await
}

/// Write the terminal zero-size chunk and an empty trailer.
pub async fn write_last_chunk<W>(writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(LAST_CHUNK).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};

    async fn decode_all(input: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = ChunkedDecoder::new(input);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn decodes_chunks_with_extensions() {
        let body = b"5;name=value\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        assert_eq!(decode_all(body).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn decodes_one_byte_at_a_time() {
        let body: &[u8] = b"a\r\n0123456789\r\n3; x\r\nabc\r\n0\r\nX-Trailer: 1\r\n\r\nNEXT";
        let mut decoder = ChunkedDecoder::new(BufReader::with_capacity(1, body));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"0123456789abc");
        assert!(decoder.is_done());
        assert_eq!(decoder.decoded(), 13);

        // Bytes after the body are not consumed.
        let mut rest = Vec::new();
        decoder.into_inner().read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn accepts_bare_lf_and_missing_trailer() {
        assert_eq!(decode_all(b"3\nabc\n0\n").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn truncated_chunk_is_an_error() {
        let err = decode_all(b"10\r\nshort").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = decode_all(b"").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn bad_size_is_invalid_data() {
        let err = decode_all(b"zz\r\nabc\r\n0\r\n\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn encoded_chunks_decode_to_the_payload() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        for piece in payload.chunks(777) {
            write_chunk(&mut wire, piece).await.unwrap();
        }
        write_chunk(&mut wire, b"").await.unwrap();
        write_last_chunk(&mut wire).await.unwrap();

        assert!(wire.ends_with(b"\r\n0\r\n\r\n"));
        assert_eq!(decode_all(&wire).await.unwrap(), payload);
    }

    #[test]
    fn chunk_framing_is_uppercase_hex() {
        assert_eq!(encode_chunk(&[0u8; 26]).get(..4), Some(&b"1A\r\n"[..]));
        assert!(encode_chunk(b"").is_empty());
    }
}
