//! In-memory HTTP message header model.
//!
//! # Responsibilities
//! - Keep header lines in arrival order for verbatim forwarding
//! - Index the fields the pipeline decides on (length, encoding, type...)
//! - Provide find / replace / remove-all mutators
//!
//! # Design Decisions
//! - One model for requests and responses; `status` is `None` for requests
//! - For singular headers the first occurrence wins, later duplicates are
//!   dropped before they reach the line list
//! - Hop-by-hop connection headers never enter the model

use std::fmt;

/// Header names that may appear at most once in a message we forward.
const SINGULAR_HEADERS: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "content-type",
    "etag",
];

/// Headers consumed by the proxy itself.
const HOP_BY_HOP: &[&str] = &["connection", "proxy-connection", "keep-alive"];

/// Content-Encoding of a body, kept as a small bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ContentEncoding(u8);

impl ContentEncoding {
    pub const NONE: Self = Self(0);
    pub const GZIP: Self = Self(1);
    pub const DEFLATE: Self = Self(1 << 1);
    pub const COMPRESS: Self = Self(1 << 2);
    pub const UNKNOWN: Self = Self(1 << 3);

    /// Classify a `Content-Encoding` value.
    ///
    /// Every listed coding contributes a bit. Codings the proxy cannot
    /// decode (brotli, zstd, charset names some servers put here...) are
    /// reported as `UNKNOWN` so the body is never touched.
    pub fn from_header_value(value: &str) -> Self {
        let mut encoding = Self::NONE;
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let token = token.to_ascii_lowercase();
            encoding = encoding
                | match token.as_str() {
                    "identity" => Self::NONE,
                    "gzip" | "x-gzip" => Self::GZIP,
                    "deflate" => Self::DEFLATE,
                    "compress" | "x-compress" => Self::COMPRESS,
                    _ => Self::UNKNOWN,
                };
        }
        encoding
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// True when gzip is the only coding applied.
    pub fn is_gzip_only(self) -> bool {
        self == Self::GZIP
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Any coding besides gzip present.
    pub fn has_non_gzip(self) -> bool {
        self.0 & !Self::GZIP.0 != 0
    }
}

impl std::ops::BitOr for ContentEncoding {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The first line of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD target PROTO`. The target is rebuilt from the parsed
    /// fields when the request is written upstream.
    Request,
    /// Verbatim status line (`HTTP/1.1 200 OK`, `ICY 200 OK`).
    Status(String),
    /// HTTP/0.9 simple response: no start line and no headers.
    Simple,
}

/// A single `Name: value` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    raw: String,
}

impl HeaderLine {
    /// Build a line from already formatted text (`"Name: value"`).
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Header name, without the colon.
    pub fn name(&self) -> &str {
        match self.raw.find(':') {
            Some(idx) => self.raw[..idx].trim_end(),
            None => self.raw.as_str(),
        }
    }

    /// Header value with surrounding whitespace removed.
    pub fn value(&self) -> &str {
        match self.raw.find(':') {
            Some(idx) => self.raw[idx + 1..].trim(),
            None => "",
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for HeaderLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parsed request or response headers.
#[derive(Debug, Clone)]
pub struct HttpHeaders {
    start: StartLine,
    lines: Vec<HeaderLine>,

    /// Request method (requests only).
    pub method: String,
    /// Request target exactly as received.
    pub url: String,
    /// Target host, lower-cased.
    pub host: String,
    pub port: u16,
    /// Origin-form path (`/index.html?q=1`).
    pub path: String,
    /// Protocol token (`HTTP/1.1`).
    pub version: String,
    /// Response status, `None` for requests.
    pub status: Option<u16>,
    /// Declared body length, `None` when unknown.
    pub content_length: Option<u64>,
    pub content_encoding: ContentEncoding,
    pub chunked: bool,
    /// Content-Type value truncated at `;`.
    pub content_type: Option<String>,
    pub has_content_range: bool,
    pub etag: Option<String>,
    pub user_agent: Option<String>,
    /// Client hint carried in `X-Ziproxy-Flags`.
    pub x_ziproxy_flags: Option<String>,
    /// Bytes already consumed from an HTTP/0.9 response body.
    pub simple_prefix: Vec<u8>,
}

impl HttpHeaders {
    /// Empty request model.
    pub fn request() -> Self {
        Self::with_start(StartLine::Request)
    }

    /// Empty response model for the given status line.
    pub fn response(status_line: impl Into<String>) -> Self {
        let line: String = status_line.into();
        let mut headers = Self::with_start(StartLine::Status(String::new()));
        headers.set_status_line(line);
        headers
    }

    /// HTTP/0.9 response whose body starts with `prefix`.
    pub fn simple_response(prefix: Vec<u8>) -> Self {
        let mut headers = Self::with_start(StartLine::Simple);
        headers.simple_prefix = prefix;
        headers
    }

    fn with_start(start: StartLine) -> Self {
        Self {
            start,
            lines: Vec::new(),
            method: String::new(),
            url: String::new(),
            host: String::new(),
            port: 80,
            path: String::new(),
            version: String::new(),
            status: None,
            content_length: None,
            content_encoding: ContentEncoding::NONE,
            chunked: false,
            content_type: None,
            has_content_range: false,
            etag: None,
            user_agent: None,
            x_ziproxy_flags: None,
            simple_prefix: Vec::new(),
        }
    }

    /// Replace the status line and re-derive status and version from it.
    pub fn set_status_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        let mut parts = line.split_whitespace();
        self.version = parts.next().unwrap_or_default().to_string();
        self.status = parts.next().and_then(|code| code.parse().ok());
        self.start = StartLine::Status(line);
    }

    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    pub fn is_simple_response(&self) -> bool {
        self.start == StartLine::Simple
    }

    pub fn is_request(&self) -> bool {
        self.start == StartLine::Request
    }

    /// Retained header lines in order.
    pub fn lines(&self) -> &[HeaderLine] {
        &self.lines
    }

    /// Record a header line received off the wire.
    ///
    /// Normalizes spacing after the colon, drops hop-by-hop headers and
    /// later duplicates of singular headers, and updates the indexed
    /// fields. Returns `false` when the line was not retained.
    pub fn ingest(&mut self, raw: &str) -> bool {
        let line = HeaderLine::new(collapse_colon_spaces(raw));
        let name = line.name().to_ascii_lowercase();

        if HOP_BY_HOP.contains(&name.as_str()) {
            return false;
        }
        if SINGULAR_HEADERS.contains(&name.as_str()) && self.find(&name).is_some() {
            tracing::debug!(header = %line, "Ignoring duplicate singular header");
            return false;
        }

        let value = line.value();
        match name.as_str() {
            "content-length" => self.content_length = value.parse().ok(),
            "content-encoding" => {
                self.content_encoding = ContentEncoding::from_header_value(value)
            }
            "transfer-encoding" => {
                self.chunked = value.to_ascii_lowercase().contains("chunked")
            }
            "content-type" => {
                let ct = value.split(';').next().unwrap_or_default().trim();
                self.content_type = (!ct.is_empty()).then(|| ct.to_string());
            }
            "content-range" => self.has_content_range = true,
            "etag" => self.etag = Some(value.to_string()),
            "user-agent" => self.user_agent = Some(value.to_string()),
            _ => {}
        }

        self.lines.push(line);
        true
    }

    /// First header with the given name.
    pub fn find(&self, name: &str) -> Option<&HeaderLine> {
        self.lines.iter().find(|line| line.is(name))
    }

    /// Value of the first header with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(HeaderLine::value)
    }

    /// Append a line without interpreting it.
    pub fn add(&mut self, raw: impl Into<String>) {
        self.lines.push(HeaderLine::new(raw));
    }

    /// Remove every header with the given name. Returns how many went.
    pub fn remove_all(&mut self, name: &str) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| !line.is(name));
        before - self.lines.len()
    }

    /// Replace every header with the given name by a single new line.
    ///
    /// The replacement takes the position of the first removed line, or
    /// goes last when the header was absent.
    pub fn replace(&mut self, name: &str, value: impl fmt::Display) {
        let line = HeaderLine::new(format!("{}: {}", name, value));
        match self.lines.iter().position(|l| l.is(name)) {
            Some(idx) => {
                self.lines[idx] = line;
                let mut seen = false;
                self.lines.retain(|l| {
                    if l.is(name) {
                        let keep = !seen;
                        seen = true;
                        keep
                    } else {
                        true
                    }
                });
            }
            None => self.lines.push(line),
        }
    }

    /// Set `Content-Length` and keep the indexed field in sync.
    pub fn set_content_length(&mut self, len: u64) {
        self.content_length = Some(len);
        self.replace("Content-Length", len);
    }

    /// Drop `Content-Length`; the body becomes close-delimited.
    pub fn clear_content_length(&mut self) {
        self.content_length = None;
        self.remove_all("Content-Length");
    }

    /// Drop `Content-Encoding` after the body has been decoded.
    pub fn clear_content_encoding(&mut self) {
        self.content_encoding = ContentEncoding::NONE;
        self.remove_all("Content-Encoding");
    }

    /// Drop `Transfer-Encoding` after the body has been dechunked.
    pub fn clear_chunked(&mut self) {
        self.chunked = false;
        self.remove_all("Transfer-Encoding");
    }

    /// True when the request speaks HTTP/1.1 or later.
    pub fn is_http11(&self) -> bool {
        self.version
            .get(5..)
            .map(|v| v != "1.0" && v != "0.9")
            .unwrap_or(false)
    }

    /// `host/path` key used by the URL tables.
    pub fn table_key(&self) -> (&str, &str) {
        (&self.host, &self.path)
    }
}

/// Collapse a run of spaces right after the first colon to one space.
///
/// Spaces further inside the value are left alone.
pub fn collapse_colon_spaces(line: &str) -> String {
    let Some(colon) = line.find(':') else {
        return line.to_string();
    };
    let (head, rest) = line.split_at(colon + 1);
    let trimmed = rest.trim_start_matches(' ');
    if rest.len() - trimmed.len() <= 1 {
        return line.to_string();
    }
    format!("{} {}", head, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_only_leading_spaces() {
        assert_eq!(collapse_colon_spaces("X-A:    b  c"), "X-A: b  c");
        assert_eq!(collapse_colon_spaces("X-A: b"), "X-A: b");
        assert_eq!(collapse_colon_spaces("X-A:b"), "X-A:b");
        assert_eq!(collapse_colon_spaces("no colon here"), "no colon here");
    }

    #[test]
    fn encoding_classification() {
        assert!(ContentEncoding::from_header_value("gzip").is_gzip_only());
        assert!(ContentEncoding::from_header_value("identity").is_none());
        assert!(ContentEncoding::from_header_value("br").has_non_gzip());
        assert!(ContentEncoding::from_header_value("ISO-8859-1").has_non_gzip());
        let both = ContentEncoding::from_header_value("deflate, gzip");
        assert!(both.contains(ContentEncoding::GZIP));
        assert!(both.contains(ContentEncoding::DEFLATE));
        assert!(!both.is_gzip_only());
    }

    #[test]
    fn ingest_indexes_fields_and_drops_hop_by_hop() {
        let mut h = HttpHeaders::response("HTTP/1.1 200 OK");
        assert!(h.ingest("Content-Type: text/html; charset=utf-8"));
        assert!(h.ingest("Content-Length: 42"));
        assert!(h.ingest("Transfer-Encoding: chunked"));
        assert!(h.ingest("Content-Range: bytes 0-1/2"));
        assert!(!h.ingest("Connection: keep-alive"));
        assert!(!h.ingest("Keep-Alive: timeout=5"));

        assert_eq!(h.status, Some(200));
        assert_eq!(h.content_type.as_deref(), Some("text/html"));
        assert_eq!(h.content_length, Some(42));
        assert!(h.chunked);
        assert!(h.has_content_range);
        assert_eq!(h.lines().len(), 4);
    }

    #[test]
    fn first_singular_header_wins() {
        let mut h = HttpHeaders::response("HTTP/1.1 200 OK");
        assert!(h.ingest("Content-Length: 10"));
        assert!(!h.ingest("content-length: 99"));
        assert_eq!(h.content_length, Some(10));
        assert_eq!(h.lines().len(), 1);

        // Non-singular headers may repeat.
        assert!(h.ingest("Set-Cookie: a=1"));
        assert!(h.ingest("Set-Cookie: b=2"));
        assert_eq!(h.lines().len(), 3);
    }

    #[test]
    fn replace_keeps_position_and_dedups() {
        let mut h = HttpHeaders::response("HTTP/1.1 200 OK");
        h.add("A: 1");
        h.add("Vary: x");
        h.add("B: 2");
        h.add("Vary: y");
        h.replace("Vary", "Accept-Encoding");
        let names: Vec<_> = h.lines().iter().map(|l| l.as_str()).collect();
        assert_eq!(names, vec!["A: 1", "Vary: Accept-Encoding", "B: 2"]);

        assert_eq!(h.remove_all("vary"), 1);
        h.set_content_length(7);
        assert_eq!(h.get("Content-Length"), Some("7"));
    }

    #[test]
    fn bogus_content_length_is_unknown() {
        let mut h = HttpHeaders::response("HTTP/1.0 200 OK");
        h.ingest("Content-Length: -1");
        assert_eq!(h.content_length, None);
        assert!(!h.is_http11());
    }
}
