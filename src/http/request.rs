//! Client request parsing.
//!
//! # Responsibilities
//! - Parse the request line into method, target and protocol
//! - Resolve the destination host and port (absolute URL, CONNECT
//!   authority, or `Host:` for transparent requests)
//! - Capture client capabilities (gzip, JP2) and the `X-Ziproxy-Flags` hint
//! - Maintain the `Via` chain and detect forwarding loops
//! - Apply the configured outgoing rewrites before the request goes upstream
//!
//! # Design Decisions
//! - Request parsing is separated from admission checks (see `security`)
//! - The request line sent upstream is rebuilt from parsed fields

use thiserror::Error;
use tokio::io::AsyncBufRead;
use url::Url;

use crate::config::ProxyConfig;
use crate::http::codec::{self, HeaderError};
use crate::http::headers::{collapse_colon_spaces, HttpHeaders};

/// Product token used in `Via` and `Server` headers.
pub const PRODUCT_NAME: &str = "ziproxy";

/// Errors raised while reading a client request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no request found or request too long")]
    NoRequest,
    #[error("can't parse request")]
    Unparsable,
    #[error("can't parse URL")]
    BadUrl,
    #[error("unknown URL type")]
    UnknownUrlType,
    #[error("HTTP proxy requests not honoured by server")]
    ConventionalDisabled,
    #[error("missing Host header in transparent request")]
    MissingHost,
    #[error("connection refused (based on Via header)")]
    ViaLoop,
    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// How the request reached the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Absolute-form target or CONNECT, client knows it talks to a proxy.
    Conventional,
    /// Origin-form target intercepted on the way to the origin.
    Transparent,
}

/// Framing of a request body the client is about to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBody {
    None,
    Length(u64),
    Chunked,
}

/// A fully read client request.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub headers: HttpHeaders,
    pub mode: ProxyMode,
    /// CONNECT tunnel request.
    pub is_connect: bool,
    /// Client advertised gzip and gzip is enabled.
    pub accepts_gzip: bool,
    /// `jp2` present in `X-Ziproxy-Flags`.
    pub accepts_jp2: bool,
    pub body: RequestBody,
}

impl ClientRequest {
    pub fn method(&self) -> &str {
        &self.headers.method
    }

    pub fn is_head(&self) -> bool {
        self.headers.method.eq_ignore_ascii_case("HEAD")
    }

    /// URL as it appears in logs: absolute for HTTP, authority for CONNECT.
    pub fn log_url(&self) -> &str {
        &self.headers.url
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.user_agent.as_deref()
    }

    /// Apply the configured rewrites to the headers sent upstream.
    pub fn prepare_upstream(&mut self, config: &ProxyConfig) {
        let proxy = &config.proxy;
        if proxy.announce_jp2 {
            self.headers.replace("X-Ziproxy-Flags", "jp2");
        }
        if proxy.override_accept_encoding {
            self.headers.replace("Accept-Encoding", "gzip");
        }
        if let Some(agent) = &proxy.redefine_user_agent {
            self.headers.replace("User-Agent", agent);
        }
        if proxy.next_proxy.is_some() {
            // A parent proxy needs the absolute form.
            self.headers.path = self.headers.url.clone();
        }
    }
}

/// Read and parse a request head from the client.
pub async fn read_request<R>(reader: &mut R, config: &ProxyConfig) -> Result<ClientRequest, RequestError>
where
    R: AsyncBufRead + Unpin,
{
    let line = match codec::read_line(reader).await {
        Ok(Some(line)) if !line.is_empty() => line,
        Ok(_) | Err(HeaderError::LineTooLong) => return Err(RequestError::NoRequest),
        Err(e) => return Err(e.into()),
    };

    let mut request = parse_request_line(&line, config)?;

    let lines = codec::read_header_lines(reader).await?;
    if request.is_connect {
        // Nothing in a CONNECT head is forwarded.
        return Ok(request);
    }

    apply_client_headers(&mut request, lines, config)?;

    if request.mode == ProxyMode::Transparent {
        if request.headers.host.is_empty() {
            return Err(RequestError::MissingHost);
        }
        let h = &mut request.headers;
        h.url = if h.port == 80 {
            format!("http://{}{}", h.host, h.path)
        } else {
            format!("http://{}:{}{}", h.host, h.port, h.path)
        };
    }

    request.body = if request.headers.chunked {
        RequestBody::Chunked
    } else {
        match request.headers.content_length {
            Some(len) if len > 0 => RequestBody::Length(len),
            _ => RequestBody::None,
        }
    };

    Ok(request)
}

/// Parse `METHOD URL PROTO` and resolve the destination.
pub fn parse_request_line(line: &str, config: &ProxyConfig) -> Result<ClientRequest, RequestError> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(url), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(RequestError::Unparsable);
    };

    let mut headers = HttpHeaders::request();
    headers.method = method.to_string();
    headers.url = url.to_string();
    headers.version = version.to_string();

    let mut mode = ProxyMode::Conventional;
    let mut is_connect = false;

    let is_absolute = url
        .get(..7)
        .map(|scheme| scheme.eq_ignore_ascii_case("http://"))
        .unwrap_or(false);

    if is_absolute {
        let (host, port, path) = parse_absolute_url(url)?;
        headers.url = format!("http://{}", &url[7..]);
        headers.host = host;
        headers.port = port;
        headers.path = path;
    } else if method == "CONNECT" {
        let (host, port) = split_host_port(url, 443).ok_or(RequestError::BadUrl)?;
        headers.host = host;
        headers.port = port;
        headers.path = url.to_string();
        is_connect = true;
    } else if url.starts_with('/') && config.proxy.transparent_proxy {
        headers.path = url.to_string();
        headers.port = 80;
        mode = ProxyMode::Transparent;
    } else {
        return Err(RequestError::UnknownUrlType);
    }

    if mode == ProxyMode::Conventional && !config.proxy.conventional_proxy {
        return Err(RequestError::ConventionalDisabled);
    }

    Ok(ClientRequest {
        headers,
        mode,
        is_connect,
        accepts_gzip: false,
        accepts_jp2: false,
        body: RequestBody::None,
    })
}

fn apply_client_headers(
    request: &mut ClientRequest,
    lines: Vec<String>,
    config: &ProxyConfig,
) -> Result<(), RequestError> {
    let server_host = config.proxy.server_host.as_deref();
    let mut saw_via = false;

    for raw in lines {
        let line = collapse_colon_spaces(&raw);
        let (name, value) = match line.split_once(':') {
            Some((n, v)) => (n.trim().to_ascii_lowercase(), v.trim()),
            None => (line.to_ascii_lowercase(), ""),
        };

        match name.as_str() {
            "x-ziproxy-flags" => {
                request.accepts_jp2 = value.contains("jp2");
                request.headers.x_ziproxy_flags = Some(value.to_string());
                continue;
            }
            "host" if request.headers.host.is_empty() => {
                let (host, port) = split_host_port(value, 80).ok_or(RequestError::MissingHost)?;
                request.headers.host = host;
                request.headers.port = port;
            }
            "accept-encoding" => {
                if value.contains("gzip") && config.transform.gzip {
                    request.accepts_gzip = true;
                }
            }
            "via" => {
                let Some(server_host) = server_host else {
                    continue;
                };
                if value.contains(server_host) && value.contains(PRODUCT_NAME) {
                    return Err(RequestError::ViaLoop);
                }
                saw_via = true;
                request
                    .headers
                    .add(format!("{}, 1.1 {} ({})", line, server_host, PRODUCT_NAME));
                continue;
            }
            _ => {}
        }

        request.headers.ingest(&line);
    }

    if let (Some(server_host), false) = (server_host, saw_via) {
        request
            .headers
            .add(format!("Via: 1.1 {} ({})", server_host, PRODUCT_NAME));
    }
    Ok(())
}

/// Split an absolute `http://` URL into host, port and origin-form path.
fn parse_absolute_url(url: &str) -> Result<(String, u16, String), RequestError> {
    let parsed = Url::parse(url).map_err(|_| RequestError::BadUrl)?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(RequestError::BadUrl)?
        .to_ascii_lowercase();
    let port = parsed.port().unwrap_or(80);

    // Keep the path bytes exactly as the client sent them.
    let after_scheme = &url[7..];
    let path = match after_scheme.find(['/', '?']) {
        Some(idx) if after_scheme[idx..].starts_with('?') => format!("/{}", &after_scheme[idx..]),
        Some(idx) => after_scheme[idx..].to_string(),
        None => "/".to_string(),
    };

    Ok((host, port, path))
}

/// Split `host[:port]`, accepting bracketed IPv6 literals.
pub fn split_host_port(authority: &str, default_port: u16) -> Option<(String, u16)> {
    let authority = authority.trim();
    if authority.is_empty() {
        return None;
    }

    if let Some(rest) = authority.strip_prefix('[') {
        let (addr, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => default_port,
            None => return None,
        };
        return Some((format!("[{}]", addr), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Some((host.to_ascii_lowercase(), port.parse().ok()?))
        }
        Some(_) => None,
        None => Some((authority.to_ascii_lowercase(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyConfig {
        ProxyConfig::default()
    }

    #[test]
    fn absolute_url_defaults() {
        let req = parse_request_line("GET http://Example.COM/a/b?c=1 HTTP/1.1", &config()).unwrap();
        assert_eq!(req.headers.host, "example.com");
        assert_eq!(req.headers.port, 80);
        assert_eq!(req.headers.path, "/a/b?c=1");
        assert_eq!(req.mode, ProxyMode::Conventional);

        let req = parse_request_line("GET http://h:8081 HTTP/1.0", &config()).unwrap();
        assert_eq!(req.headers.port, 8081);
        assert_eq!(req.headers.path, "/");
    }

    #[test]
    fn connect_defaults_to_443() {
        let req = parse_request_line("CONNECT secure.example:8443 HTTP/1.1", &config()).unwrap();
        assert!(req.is_connect);
        assert_eq!(req.headers.port, 8443);

        let req = parse_request_line("CONNECT secure.example HTTP/1.1", &config()).unwrap();
        assert_eq!(req.headers.port, 443);
    }

    #[test]
    fn origin_form_requires_transparent_mode() {
        assert!(matches!(
            parse_request_line("GET /index.html HTTP/1.1", &config()),
            Err(RequestError::UnknownUrlType)
        ));

        let mut cfg = config();
        cfg.proxy.transparent_proxy = true;
        let req = parse_request_line("GET /index.html HTTP/1.1", &cfg).unwrap();
        assert_eq!(req.mode, ProxyMode::Transparent);
    }

    #[test]
    fn conventional_can_be_disabled() {
        let mut cfg = config();
        cfg.proxy.conventional_proxy = false;
        cfg.proxy.transparent_proxy = true;
        assert!(matches!(
            parse_request_line("GET http://a/ HTTP/1.1", &cfg),
            Err(RequestError::ConventionalDisabled)
        ));
    }

    #[test]
    fn two_tokens_is_unparsable() {
        assert!(matches!(
            parse_request_line("GET http://a/", &config()),
            Err(RequestError::Unparsable)
        ));
    }

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("a.b:81", 80), Some(("a.b".into(), 81)));
        assert_eq!(split_host_port("a.b", 80), Some(("a.b".into(), 80)));
        assert_eq!(split_host_port("[::1]:8080", 80), Some(("[::1]".into(), 8080)));
        assert_eq!(split_host_port("a.b:xx", 80), None);
    }

    #[tokio::test]
    async fn client_headers_are_filtered_and_captured() {
        let mut cfg = config();
        cfg.proxy.server_host = Some("proxy.local".into());
        let mut input: &[u8] = b"GET http://site/x HTTP/1.1\r\n\
Host: site\r\n\
Accept-Encoding:   gzip, deflate\r\n\
X-Ziproxy-Flags: jp2\r\n\
Proxy-Connection: keep-alive\r\n\
User-Agent: test\r\n\
\r\n";
        let req = read_request(&mut input, &cfg).await.unwrap();
        assert!(req.accepts_gzip);
        assert!(req.accepts_jp2);
        assert_eq!(req.user_agent(), Some("test"));
        assert!(req.headers.find("X-Ziproxy-Flags").is_none());
        assert!(req.headers.find("Proxy-Connection").is_none());
        assert_eq!(req.headers.get("Accept-Encoding"), Some("gzip, deflate"));
        assert_eq!(req.headers.get("Via"), Some("1.1 proxy.local (ziproxy)"));
        assert_eq!(req.body, RequestBody::None);
    }

    #[tokio::test]
    async fn via_loop_is_rejected() {
        let mut cfg = config();
        cfg.proxy.server_host = Some("proxy.local".into());
        let mut input: &[u8] =
            b"GET http://site/ HTTP/1.1\r\nVia: 1.1 proxy.local (ziproxy)\r\n\r\n";
        assert!(matches!(
            read_request(&mut input, &cfg).await,
            Err(RequestError::ViaLoop)
        ));
    }

    #[tokio::test]
    async fn transparent_request_uses_host_header() {
        let mut cfg = config();
        cfg.proxy.transparent_proxy = true;
        let mut input: &[u8] = b"POST /form HTTP/1.1\r\nHost: Site.example:8080\r\nContent-Length: 3\r\n\r\n";
        let req = read_request(&mut input, &cfg).await.unwrap();
        assert_eq!(req.headers.host, "site.example");
        assert_eq!(req.headers.port, 8080);
        assert_eq!(req.log_url(), "http://site.example:8080/form");
        assert_eq!(req.body, RequestBody::Length(3));
    }

    #[test]
    fn upstream_rewrites() {
        let mut cfg = config();
        cfg.proxy.redefine_user_agent = Some("agent/1".into());
        cfg.proxy.announce_jp2 = true;
        let mut req = parse_request_line("GET http://a/b HTTP/1.1", &cfg).unwrap();
        req.headers.ingest("Accept-Encoding: br");
        req.prepare_upstream(&cfg);
        assert_eq!(req.headers.get("Accept-Encoding"), Some("gzip"));
        assert_eq!(req.headers.get("User-Agent"), Some("agent/1"));
        assert_eq!(req.headers.get("X-Ziproxy-Flags"), Some("jp2"));
        assert_eq!(req.headers.path, "/b");
    }
}
