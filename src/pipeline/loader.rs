//! Bounded in-memory body loading.
//!
//! # Responsibilities
//! - Read a whole body into memory when it fits `max_size`
//! - Switch to streaming the moment it does not, without losing a byte
//!
//! # Design Decisions
//! - The buffer grows by exact reservations of at most one increment, capped
//!   at `max_size + 1`, so its capacity never exceeds `max_size` plus one
//!   increment
//! - On overflow the loader sends the headers itself; callers only learn
//!   about the switch through the returned variant
//! - A dechunked body that overflows can only be re-chunked, which needs an
//!   HTTP/1.1 client; HTTP/1.0 clients get an error before any byte is sent

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{write_chunk, write_last_chunk};
use crate::http::codec::write_headers;
use crate::http::headers::HttpHeaders;
use crate::pipeline::body::OriginBody;

/// Buffer growth step.
pub const LOAD_INCREMENT: usize = 64 * 1024;

/// Errors raised while loading.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("chunked body larger than {max_size} bytes cannot be relayed to an HTTP/1.0 client")]
    TooBigForProtocol { max_size: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What the loader ended up doing with the body.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The complete body, dechunked.
    Resident(Vec<u8>),
    /// The body did not fit and was streamed unmodified.
    Streamed {
        /// Payload bytes forwarded to the client.
        bytes_forwarded: u64,
        /// Bytes held in memory when the switch happened.
        peak_buffered: usize,
    },
}

/// Loads bodies of at most `max_size` bytes. `0` means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct BufferedLoader {
    max_size: u64,
}

impl BufferedLoader {
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    fn overflows(&self, len: usize) -> bool {
        self.max_size != 0 && len as u64 > self.max_size
    }

    /// Bytes to read next: one increment, or just enough to see an overflow.
    fn next_read(&self, len: usize) -> usize {
        if self.max_size == 0 {
            return LOAD_INCREMENT;
        }
        let limit = usize::try_from(self.max_size.saturating_add(1)).unwrap_or(usize::MAX);
        limit.saturating_sub(len).min(LOAD_INCREMENT)
    }

    /// Load `body`. On overflow `headers` are written to `sink` followed by
    /// the buffered prefix and the rest of the body.
    pub async fn load<R, W>(
        &self,
        body: &mut OriginBody<R>,
        headers: &mut HttpHeaders,
        client_http11: bool,
        sink: &mut W,
    ) -> Result<LoadOutcome, LoadError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let start = buf.len();
            let want = self.next_read(start);
            // `reserve_exact` keeps `Vec` from doubling its allocation.
            buf.reserve_exact(want);
            buf.resize(start + want, 0);
            let n = body.read(&mut buf[start..]).await?;
            buf.truncate(start + n);
            if n == 0 {
                return Ok(LoadOutcome::Resident(buf));
            }
            if self.overflows(buf.len()) {
                break;
            }
        }

        let peak_buffered = buf.len();
        tracing::debug!(
            buffered = peak_buffered,
            max_size = self.max_size,
            "Body exceeds MaxSize, streaming original data"
        );

        let bytes_forwarded = if body.is_chunked() {
            if !client_http11 {
                return Err(LoadError::TooBigForProtocol {
                    max_size: self.max_size,
                });
            }
            headers.replace("Transfer-Encoding", "chunked");
            headers.clear_content_length();
            write_headers(sink, headers).await?;
            relay_chunked(buf, body, sink).await?
        } else {
            write_headers(sink, headers).await?;
            sink.write_all(&buf).await?;
            let rest = tokio::io::copy(body, sink).await?;
            sink.flush().await?;
            buf.len() as u64 + rest
        };

        Ok(LoadOutcome::Streamed {
            bytes_forwarded,
            peak_buffered,
        })
    }
}

/// Re-chunk the buffered prefix and the remainder of a dechunked body.
async fn relay_chunked<R, W>(prefix: Vec<u8>, body: &mut OriginBody<R>, sink: &mut W) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut forwarded = prefix.len() as u64;
    write_chunk(sink, &prefix).await?;
    drop(prefix);

    let mut buf = vec![0u8; LOAD_INCREMENT];
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        write_chunk(sink, &buf[..n]).await?;
        forwarded += n as u64;
    }
    write_last_chunk(sink).await?;
    Ok(forwarded)
}
