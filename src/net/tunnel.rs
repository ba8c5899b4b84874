//! Blind byte tunnel between client and origin.
//!
//! Used for CONNECT and for URLs exempt from processing. Bytes are copied
//! in both directions until either side closes. One idle timer covers both
//! directions and is re-armed by traffic either way, so a download with a
//! silent upload direction is not cut off.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TUNNEL_BUF: usize = 16 * 1024;

/// Bytes moved by a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub upstream: u64,
    pub downstream: u64,
}

/// Copy until either side reaches EOF, or fail with `TimedOut` once nothing
/// moved for `idle`.
pub async fn tunnel<CR, CW, OR, OW>(
    client_read: &mut CR,
    client_write: &mut CW,
    origin_read: &mut OR,
    origin_write: &mut OW,
    idle: Duration,
) -> io::Result<TunnelStats>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    OR: AsyncRead + Unpin,
    OW: AsyncWrite + Unpin,
{
    let mut up = vec![0u8; TUNNEL_BUF];
    let mut down = vec![0u8; TUNNEL_BUF];
    let mut stats = TunnelStats::default();

    loop {
        tokio::select! {
            n = client_read.read(&mut up) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                origin_write.write_all(&up[..n]).await?;
                origin_write.flush().await?;
                stats.upstream += n as u64;
            }
            n = origin_read.read(&mut down) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                client_write.write_all(&down[..n]).await?;
                client_write.flush().await?;
                stats.downstream += n as u64;
            }
            _ = tokio::time::sleep(idle) => {
                tracing::debug!(?stats, "Tunnel idle, closing");
                return Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel idle"));
            }
        }
    }

    tracing::trace!(?stats, "Tunnel closed");
    if let Err(e) = origin_write.shutdown().await {
        tracing::debug!(error = %e, "Closing origin side of tunnel failed");
    }
    if let Err(e) = client_write.shutdown().await {
        tracing::debug!(error = %e, "Closing client side of tunnel failed");
    }
    Ok(stats)
}
