//! Error responses generated by the proxy itself.
//!
//! # Responsibilities
//! - Map every session-level failure to one status code and message
//! - Render the page, preferring a configured custom body
//!
//! # Design Decisions
//! - Custom bodies are read once at startup; an unreadable file falls back
//!   to the generated page
//! - Every page closes the connection

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::codec::HeaderError;
use crate::http::request::{RequestError, PRODUCT_NAME};
use crate::net::ConnectError;
use crate::pipeline::TransferError;
use crate::policy::PolicyError;
use crate::security::AdmissionError;

/// An error response about to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPage {
    pub status: u16,
    pub title: &'static str,
    pub message: String,
}

impl ErrorPage {
    pub fn new(status: u16, title: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            title,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, "Bad Request", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, "Forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, "Not Found", message)
    }

    pub fn timeout() -> Self {
        Self::new(408, "Request Timeout", "Request timed out.")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "Internal Error", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, "Service Unavailable", message)
    }

    /// Page for a request that could not be read or admitted.
    pub fn from_request_error(error: &RequestError) -> Option<Self> {
        let page = match error {
            RequestError::ViaLoop => Self::unavailable("Connection refused (based on Via header)."),
            RequestError::Header(e) if is_timeout(e) => Self::timeout(),
            RequestError::Header(HeaderError::Io(_)) => return None,
            RequestError::Header(HeaderError::TooManyHeaders) => {
                Self::bad_request("Too many headers.")
            }
            RequestError::Header(HeaderError::LineTooLong) => {
                Self::bad_request("Line too long.")
            }
            other => Self::bad_request(format!("{}.", capitalize(&other.to_string()))),
        };
        Some(page)
    }

    pub fn from_admission_error(error: &AdmissionError) -> Self {
        Self::forbidden(error.to_string())
    }

    pub fn from_connect_error(error: &ConnectError) -> Self {
        match error {
            ConnectError::UnknownHost(_) => Self::not_found("Unknown host."),
            ConnectError::Refused { .. } => Self::unavailable("Connection refused."),
            ConnectError::TimedOut { .. } => Self::timeout(),
        }
    }

    /// Page for an origin response head that could not be read.
    pub fn from_origin_error(error: &HeaderError) -> Self {
        if is_timeout(error) {
            Self::timeout()
        } else {
            Self::new(500, "Server error", "Empty response from server")
        }
    }

    /// Page for a failed transfer. `None` when the failure is a dead
    /// connection and nothing can be sent.
    pub fn from_transfer_error(error: &TransferError) -> Option<Self> {
        let page = match error {
            TransferError::Policy(PolicyError::PartialContentConflict) => Self::new(
                409,
                "Conflict",
                "Client has requested partial content for a dynamically-optimized Content-Type.",
            ),
            TransferError::Denied => Self::forbidden("Forbidden URL."),
            TransferError::RatioExceeded { .. } => {
                Self::internal("Uncompressed gzipped data exceedes safety threshold.")
            }
            TransferError::TooBigForProtocol { .. } => {
                Self::internal("Too big file. Try using HTTP/1.1 client.")
            }
            TransferError::Io(e) if e.kind() == io::ErrorKind::TimedOut => Self::timeout(),
            TransferError::Io(_) => return None,
        };
        Some(page)
    }
}

fn is_timeout(error: &HeaderError) -> bool {
    matches!(error, HeaderError::Io(e) if e.kind() == io::ErrorKind::TimedOut)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Renders error pages, with custom bodies where configured.
#[derive(Debug, Clone, Default)]
pub struct ErrorPages {
    custom: BTreeMap<u16, Vec<u8>>,
    hostname: String,
}

impl ErrorPages {
    /// Load the custom bodies named in the configuration.
    pub fn load(paths: &BTreeMap<String, PathBuf>) -> Self {
        let mut custom = BTreeMap::new();
        for (status, path) in paths {
            let Ok(code) = status.parse::<u16>() else {
                tracing::warn!(status = %status, "Ignoring custom error page for unknown status");
                continue;
            };
            match std::fs::read(path) {
                Ok(body) => {
                    custom.insert(code, body);
                }
                Err(e) => tracing::warn!(
                    status = code,
                    path = %path.display(),
                    error = %e,
                    "Custom error page unreadable, using generated page"
                ),
            }
        }
        Self {
            custom,
            hostname: local_hostname(),
        }
    }

    /// Serialize a complete response for `page`.
    pub fn render(&self, page: &ErrorPage) -> Vec<u8> {
        let now = SystemTime::now();
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nServer: {}\r\nDate: {}\r\nContent-Type: text/html\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n",
            page.status,
            page.title,
            PRODUCT_NAME,
            httpdate::fmt_http_date(now),
        )
        .into_bytes();

        match self.custom.get(&page.status) {
            Some(body) => out.extend_from_slice(body),
            None => out.extend_from_slice(
                format!(
                    "<HTML><HEAD><TITLE>{status} {title}</TITLE></HEAD>\n\
                     <BODY BGCOLOR=\"#cc9999\"><H4>{status} {title}</H4>\n\
                     {message}\n\
                     <HR>\n<ADDRESS>Generated {date} by {host} ({product}/{version})</ADDRESS>\n\
                     </BODY></HTML>\n",
                    status = page.status,
                    title = page.title,
                    message = page.message,
                    date = httpdate::fmt_http_date(now),
                    host = self.hostname,
                    product = PRODUCT_NAME,
                    version = env!("CARGO_PKG_VERSION"),
                )
                .as_bytes(),
            ),
        }
        out
    }

    /// Write `page` and flush.
    pub async fn send<W>(&self, writer: &mut W, page: &ErrorPage) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(status = page.status, message = %page.message, "Sending error page");
        writer.write_all(&self.render(page)).await?;
        writer.flush().await
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_page_layout() {
        let pages = ErrorPages::default();
        let out = String::from_utf8(pages.render(&ErrorPage::forbidden("Forbidden URL."))).unwrap();
        assert!(out.starts_with("HTTP/1.1 403 Forbidden\r\nServer: ziproxy\r\nDate: "));
        assert!(out.contains("\r\nContent-Type: text/html\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n"));
        assert!(out.contains("<H4>403 Forbidden</H4>\nForbidden URL.\n"));
    }

    #[test]
    fn custom_body_replaces_generated_one() {
        let path = std::env::temp_dir().join(format!("ziproxy-404-{}.html", std::process::id()));
        std::fs::write(&path, "<p>gone fishing</p>").unwrap();
        let mut paths = BTreeMap::new();
        paths.insert("404".to_string(), path.clone());
        paths.insert("500".to_string(), PathBuf::from("/nonexistent/500.html"));
        let pages = ErrorPages::load(&paths);
        std::fs::remove_file(&path).unwrap();

        let out = String::from_utf8(pages.render(&ErrorPage::not_found("x"))).unwrap();
        assert!(out.ends_with("\r\n\r\n<p>gone fishing</p>"));

        let out = String::from_utf8(pages.render(&ErrorPage::internal("boom"))).unwrap();
        assert!(out.contains("<H4>500 Internal Error</H4>\nboom\n"));
    }

    #[test]
    fn transfer_errors_map_to_statuses() {
        let status = |e: TransferError| ErrorPage::from_transfer_error(&e).map(|p| p.status);
        assert_eq!(status(TransferError::Policy(PolicyError::PartialContentConflict)), Some(409));
        assert_eq!(status(TransferError::Denied), Some(403));
        assert_eq!(status(TransferError::RatioExceeded { bytes_in: 1, bytes_out: 2 }), Some(500));
        assert_eq!(status(TransferError::TooBigForProtocol { max_size: 1 }), Some(500));
        assert_eq!(status(io::Error::from(io::ErrorKind::TimedOut).into()), Some(408));
        assert_eq!(status(io::Error::from(io::ErrorKind::BrokenPipe).into()), None);
    }

    #[test]
    fn connect_and_admission_errors_map_to_statuses() {
        let unknown = ErrorPage::from_connect_error(&ConnectError::UnknownHost("x".into()));
        assert_eq!((unknown.status, unknown.message.as_str()), (404, "Unknown host."));
        let refused = ErrorPage::from_connect_error(&ConnectError::Refused { host: "x".into(), port: 80 });
        assert_eq!((refused.status, refused.message.as_str()), (503, "Connection refused."));
        let timed_out = ErrorPage::from_connect_error(&ConnectError::TimedOut { host: "x".into(), port: 80 });
        assert_eq!(timed_out.status, 408);

        let page = ErrorPage::from_admission_error(&AdmissionError::ConnectDisabled);
        assert_eq!((page.status, page.message.as_str()), (403, "CONNECT method not allowed."));
    }

    #[test]
    fn request_errors_map_to_statuses() {
        let status = |e: RequestError| ErrorPage::from_request_error(&e).map(|p| p.status);
        assert_eq!(status(RequestError::ViaLoop), Some(503));
        assert_eq!(status(RequestError::UnknownUrlType), Some(400));
        assert_eq!(status(RequestError::Header(HeaderError::TooManyHeaders)), Some(400));
        assert_eq!(
            status(RequestError::Header(HeaderError::Io(io::ErrorKind::TimedOut.into()))),
            Some(408)
        );
        assert_eq!(
            status(RequestError::Header(HeaderError::Io(io::ErrorKind::ConnectionReset.into()))),
            None
        );
        let page = ErrorPage::from_request_error(&RequestError::UnknownUrlType).unwrap();
        assert_eq!(page.message, "Unknown URL type.");
    }
}
