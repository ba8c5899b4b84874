//! Reading and writing HTTP/1.x header blocks.
//!
//! # Responsibilities
//! - Read CRLF or LF terminated lines with a hard length limit
//! - Read a response head, detecting HTTP/0.9 simple responses
//! - Serialize a header model back onto the wire
//!
//! # Design Decisions
//! - Lines are decoded as Latin-1 so that re-encoding them is byte-exact
//! - The proxy never keeps connections alive: every head it writes ends
//!   with `Connection: close` and `Proxy-Connection: close`

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::headers::{HttpHeaders, StartLine};

/// Longest header line accepted, terminator excluded.
pub const MAX_LINE_LEN: usize = 16384;

/// Most header lines accepted in one message.
pub const MAX_HEADERS: usize = 200;

/// Errors raised while reading a header block.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("header line longer than {MAX_LINE_LEN} bytes")]
    LineTooLong,
    #[error("more than {MAX_HEADERS} header lines")]
    TooManyHeaders,
    #[error("connection closed in the middle of a header line")]
    Truncated,
    #[error("empty response from server")]
    EmptyResponse,
    #[error("malformed start line {0:?}")]
    MalformedStartLine(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read one line without its terminator.
///
/// Returns `Ok(None)` on a clean EOF before any byte of the line.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, HeaderError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(HeaderError::Truncated);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if buf.len() + pos > MAX_LINE_LEN + 1 {
                    return Err(HeaderError::LineTooLong);
                }
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                break;
            }
            None => {
                let n = available.len();
                if buf.len() + n > MAX_LINE_LEN + 1 {
                    return Err(HeaderError::LineTooLong);
                }
                buf.extend_from_slice(available);
                reader.consume(n);
            }
        }
    }

    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > MAX_LINE_LEN {
        return Err(HeaderError::LineTooLong);
    }
    Ok(Some(latin1_decode(&buf)))
}

/// Read header lines up to the blank line that ends the block.
///
/// EOF right after the start line is treated as an empty block.
pub async fn read_header_lines<R>(reader: &mut R) -> Result<Vec<String>, HeaderError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    while let Some(line) = read_line(reader).await? {
        if line.is_empty() {
            break;
        }
        if lines.len() >= MAX_HEADERS {
            return Err(HeaderError::TooManyHeaders);
        }
        lines.push(line);
    }
    Ok(lines)
}

/// Read a response head from the origin.
///
/// A response that does not start with `HTTP` or `ICY` is an HTTP/0.9
/// simple response; the bytes already consumed are kept in
/// [`HttpHeaders::simple_prefix`] so they can be forwarded.
pub async fn read_response_headers<R>(reader: &mut R) -> Result<HttpHeaders, HeaderError>
where
    R: AsyncBufRead + Unpin,
{
    let mut prefix = Vec::with_capacity(4);
    while prefix.len() < 4 {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        let take = (4 - prefix.len()).min(available.len());
        prefix.extend_from_slice(&available[..take]);
        reader.consume(take);
    }

    if prefix.is_empty() {
        return Err(HeaderError::EmptyResponse);
    }

    let is_http = prefix.len() == 4
        && (prefix.eq_ignore_ascii_case(b"HTTP") || prefix[..3].eq_ignore_ascii_case(b"ICY"));
    if !is_http {
        tracing::debug!("Received HTTP/0.9 simple response");
        return Ok(HttpHeaders::simple_response(prefix));
    }

    let rest = read_line(reader).await?.ok_or(HeaderError::Truncated)?;
    let status_line = format!("{}{}", latin1_decode(&prefix), rest);
    let mut headers = HttpHeaders::response(status_line.clone());
    if headers.status.is_none() {
        return Err(HeaderError::MalformedStartLine(status_line));
    }

    for line in read_header_lines(reader).await? {
        headers.ingest(&line);
    }
    Ok(headers)
}

/// Serialize a head: start line, retained lines, close markers, blank line.
///
/// Simple responses have no head and serialize to nothing.
pub fn serialize_headers(headers: &HttpHeaders) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    match headers.start_line() {
        StartLine::Simple => return out,
        StartLine::Request => {
            latin1_encode_into(
                &mut out,
                &format!("{} {} {}", headers.method, headers.path, headers.version),
            );
        }
        StartLine::Status(line) => latin1_encode_into(&mut out, line),
    }
    out.extend_from_slice(b"\r\n");

    for line in headers.lines() {
        latin1_encode_into(&mut out, line.as_str());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Connection: close\r\nProxy-Connection: close\r\n\r\n");
    out
}

/// Write a head and flush it.
pub async fn write_headers<W>(writer: &mut W, headers: &HttpHeaders) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serialize_headers(headers);
    if bytes.is_empty() {
        return Ok(());
    }
    writer.write_all(&bytes).await?;
    writer.flush().await
}

fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn latin1_encode_into(out: &mut Vec<u8>, text: &str) {
    out.extend(text.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_crlf_and_lf_lines() {
        let mut input: &[u8] = b"first\r\nsecond\nthird";
        assert_eq!(read_line(&mut input).await.unwrap().as_deref(), Some("first"));
        assert_eq!(read_line(&mut input).await.unwrap().as_deref(), Some("second"));
        assert!(matches!(read_line(&mut input).await, Err(HeaderError::Truncated)));
    }

    #[tokio::test]
    async fn rejects_overlong_line() {
        let mut data = vec![b'a'; MAX_LINE_LEN + 10];
        data.extend_from_slice(b"\r\n");
        let mut input: &[u8] = &data;
        assert!(matches!(read_line(&mut input).await, Err(HeaderError::LineTooLong)));
    }

    #[tokio::test]
    async fn rejects_too_many_headers() {
        let mut data = String::new();
        for i in 0..=MAX_HEADERS {
            data.push_str(&format!("X-H{}: v\r\n", i));
        }
        data.push_str("\r\n");
        let mut input = data.as_bytes();
        assert!(matches!(
            read_header_lines(&mut input).await,
            Err(HeaderError::TooManyHeaders)
        ));
    }

    #[tokio::test]
    async fn parses_response_head_and_leaves_body() {
        let mut input: &[u8] =
            b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nConnection: keep-alive\r\n\r\nbody";
        let headers = read_response_headers(&mut input).await.unwrap();
        assert_eq!(headers.status, Some(404));
        assert_eq!(headers.lines().len(), 1);

        let mut rest = String::new();
        input.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "body");
    }

    #[tokio::test]
    async fn detects_simple_response() {
        let mut input: &[u8] = b"<html>hi</html>";
        let headers = read_response_headers(&mut input).await.unwrap();
        assert!(headers.is_simple_response());
        assert_eq!(headers.simple_prefix, b"<htm");
        assert!(serialize_headers(&headers).is_empty());
    }

    #[tokio::test]
    async fn icy_status_line_is_a_response() {
        let mut input: &[u8] = b"ICY 200 OK\r\nicy-name: radio\r\n\r\n";
        let headers = read_response_headers(&mut input).await.unwrap();
        assert_eq!(headers.status, Some(200));
        assert!(!headers.is_simple_response());
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let mut input: &[u8] = b"";
        assert!(matches!(
            read_response_headers(&mut input).await,
            Err(HeaderError::EmptyResponse)
        ));
    }

    #[test]
    fn serialization_appends_close_markers() {
        let mut headers = HttpHeaders::response("HTTP/1.1 200 OK");
        headers.ingest("Content-Type:    text/html");
        headers.ingest("Server: x\u{e9}");
        let text = serialize_headers(&headers);
        assert_eq!(
            text,
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nServer: x\xe9\r\n\
Connection: close\r\nProxy-Connection: close\r\n\r\n"
                .to_vec()
        );
    }
}
