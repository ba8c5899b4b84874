//! Origin connection establishment.
//!
//! # Responsibilities
//! - Resolve the destination (or the configured next proxy)
//! - Try each resolved address in turn, IPv4 first
//! - Bound the whole attempt by the connect timeout
//!
//! # Design Decisions
//! - Resolution failure and refusal are distinct errors because they map
//!   to different error pages
//! - CONNECT tunnels never go through the next proxy

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::Instant;

use crate::http::request::split_host_port;
use crate::resilience::with_deadline;

/// Default port of a `next_proxy` given without one.
pub const NEXT_PROXY_DEFAULT_PORT: u16 = 8080;

/// Errors raised while opening an origin connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unknown host {0}")]
    UnknownHost(String),
    #[error("connection to {host}:{port} refused")]
    Refused { host: String, port: u16 },
    #[error("connection to {host}:{port} timed out")]
    TimedOut { host: String, port: u16 },
}

/// Where a request is actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
}

impl Upstream {
    /// Destination for a request to `host:port`, honouring `next_proxy`.
    pub fn resolve_route(host: &str, port: u16, next_proxy: Option<&str>) -> Self {
        match next_proxy.and_then(|next| split_host_port(next, NEXT_PROXY_DEFAULT_PORT)) {
            Some((host, port)) => Self { host, port },
            None => Self {
                host: host.to_string(),
                port,
            },
        }
    }
}

/// Open a TCP connection to `upstream` within `timeout`.
pub async fn connect_origin(upstream: &Upstream, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let Upstream { host, port } = upstream;
    let timed_out = || ConnectError::TimedOut {
        host: host.clone(),
        port: *port,
    };
    let deadline = Instant::now() + timeout;

    let addrs = match with_deadline(timeout, resolve(host, *port)).await {
        Ok(addrs) if !addrs.is_empty() => addrs,
        Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(timed_out()),
        _ => return Err(ConnectError::UnknownHost(host.clone())),
    };

    for addr in &addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match with_deadline(remaining, TcpStream::connect(addr)).await {
            Ok(stream) => {
                tracing::debug!(%host, %addr, "Connected to origin");
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(timed_out()),
            Err(e) => tracing::debug!(%host, %addr, error = %e, "Origin address failed"),
        }
    }
    Err(ConnectError::Refused {
        host: host.clone(),
        port: *port,
    })
}

/// Resolve `host:port`, IPv4 addresses first.
async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let mut addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    addrs.sort_by_key(|addr| !addr.is_ipv4());
    Ok(addrs)
}
