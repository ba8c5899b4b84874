//! Response transfer.
//!
//! # Responsibilities
//! - Run the content policy and pick one strategy per response
//! - Drive that strategy to completion over the origin and client streams
//! - Record what happened on the access entry
//!
//! # Design Decisions
//! - Nothing reaches the client before the strategy is known, so policy
//!   failures can always become an error page
//! - Once a head has been written, failures are only logged
//! - The buffered path degrades to forwarding the original body on every
//!   failure except a decompression bomb

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, gunzip_in_memory, gzip_in_memory, CodecError};
use crate::config::ProxyConfig;
use crate::http::codec::write_headers;
use crate::http::headers::{ContentEncoding, HttpHeaders};
use crate::http::request::ClientRequest;
use crate::observability::metrics;
use crate::observability::{AccessEntry, AccessFlag};
use crate::pipeline::body::{forward_raw, OriginBody};
use crate::pipeline::loader::{BufferedLoader, LoadError, LoadOutcome};
use crate::pipeline::sink::ClientSink;
use crate::pipeline::strategy::{select, select_before_origin, Strategy, StrategyInputs};
use crate::policy::{ContentPolicy, PolicyError, TransformFlags};
use crate::tables::Tables;
use crate::transform::dns::{collect_hostnames, spawn_preemptive_resolution};
use crate::transform::image::smaller_of;
use crate::transform::{looks_like_html, HtmlOptions, ImageOutcome, Transformers};

/// 1x1 transparent GIF sent in place of replaced bodies.
pub const REPLACEMENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Failures that end a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("forbidden URL")]
    Denied,
    #[error("uncompressed gzipped data exceeds safety threshold ({bytes_out} bytes from {bytes_in})")]
    RatioExceeded { bytes_in: u64, bytes_out: u64 },
    #[error("chunked body over {max_size} bytes cannot be sent to an HTTP/1.0 client")]
    TooBigForProtocol { max_size: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// How a completed transfer was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub strategy: Strategy,
}

/// Per-response dispatcher, shared by every connection.
#[derive(Debug, Clone)]
pub struct TransferPipeline {
    config: Arc<ProxyConfig>,
    tables: Arc<Tables>,
    transformers: Transformers,
}

impl TransferPipeline {
    pub fn new(config: Arc<ProxyConfig>, tables: Arc<Tables>, transformers: Transformers) -> Self {
        Self {
            config,
            tables,
            transformers,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Strategy that applies before the origin is contacted, if any.
    pub fn request_strategy(&self, request: &ClientRequest) -> Option<Strategy> {
        let (host, path) = request.headers.table_key();
        select_before_origin(
            self.tables.is_no_processing(host, path),
            self.tables.is_denied(host, path),
        )
    }

    /// Relay one origin response to the client.
    ///
    /// `origin` is positioned right after the response head. Errors are
    /// returned untouched; whether they can still become an error page is
    /// for the caller to decide with [`ClientSink::started`].
    pub async fn run<R, W>(
        &self,
        request: &ClientRequest,
        mut response: HttpHeaders,
        origin: &mut R,
        sink: &mut ClientSink<W>,
        entry: &AccessEntry,
    ) -> Result<TransferOutcome, TransferError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let decision = ContentPolicy::new(&self.config, &self.tables).decide(request, &response)?;

        let (host, path) = request.headers.table_key();
        let inputs = StrategyInputs {
            no_processing: self.tables.is_no_processing(host, path),
            denied: self.tables.is_denied(host, path),
            replaced: self
                .tables
                .is_replaced(host, path, response.content_type.as_deref()),
            is_head: request.is_head(),
            simple_response: response.is_simple_response(),
            encoding: response.content_encoding,
            flags: decision.flags,
            content_length: response.content_length,
            max_size: self.config.limits.max_size,
        };
        let strategy = select(&inputs);
        tracing::debug!(
            %strategy,
            flags = ?decision.flags,
            content_length = ?response.content_length,
            chunked = response.chunked,
            "Selected transfer strategy"
        );
        metrics::record_request(strategy.as_str());

        match strategy {
            Strategy::Deny => return Err(TransferError::Denied),
            Strategy::ReplaceData => replace_data(response, sink, entry).await?,
            Strategy::HeadOnly => write_headers(sink, &response).await?,
            Strategy::SimpleResponse => {
                sink.write_all(&response.simple_prefix).await?;
                forward_raw(origin, sink, &response).await?;
            }
            Strategy::NoProcessing
            | Strategy::UndecodableEncoding
            | Strategy::PassThroughTooLarge => {
                write_headers(sink, &response).await?;
                forward_raw(origin, sink, &response).await?;
            }
            Strategy::StreamCompress => self.stream_compress(response, origin, sink).await?,
            Strategy::StreamDecompress => {
                self.stream_decompress(response, origin, sink, entry).await?
            }
            Strategy::BufferAndTransform => {
                self.buffer_and_transform(request, response, decision.flags, origin, sink, entry)
                    .await?
            }
        }

        Ok(TransferOutcome { strategy })
    }

    async fn stream_compress<R, W>(
        &self,
        mut response: HttpHeaders,
        origin: &mut R,
        sink: &mut ClientSink<W>,
    ) -> Result<(), TransferError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut body = OriginBody::new(origin, &response);
        response.clear_chunked();
        response.clear_content_length();
        response.replace("Content-Encoding", "gzip");
        response.content_encoding = ContentEncoding::GZIP;
        write_headers(sink, &response).await?;

        match codec::compress(&mut body, sink, self.config.limits.gzip_level).await {
            Ok(stats) => {
                tracing::debug!(bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "Gzip stream finished");
                Ok(())
            }
            Err(CodecError::Io(e)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Error while gzip-streaming");
                Ok(())
            }
        }
    }

    async fn stream_decompress<R, W>(
        &self,
        mut response: HttpHeaders,
        origin: &mut R,
        sink: &mut ClientSink<W>,
        entry: &AccessEntry,
    ) -> Result<(), TransferError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut body = OriginBody::new(origin, &response);
        response.clear_chunked();
        response.clear_content_encoding();
        response.clear_content_length();
        write_headers(sink, &response).await?;

        let limits = &self.config.limits;
        let result = codec::decompress(
            &mut body,
            sink,
            limits.max_uncompressed_gzip_ratio,
            limits.min_uncompressed_gzip_stream_eval,
        )
        .await;
        match result {
            Ok(stats) => {
                tracing::debug!(bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "Gunzip stream finished");
                Ok(())
            }
            Err(CodecError::RatioExceeded { bytes_in, bytes_out }) => {
                entry.set_flag(AccessFlag::GzipRatioExceeded);
                tracing::warn!(bytes_in, bytes_out, "Gunzip stream aborted, ratio exceeded");
                Ok(())
            }
            Err(CodecError::Data(e)) => {
                tracing::warn!(error = %e, "Error while gunzip-streaming");
                Ok(())
            }
            Err(CodecError::Io(e)) => Err(e.into()),
        }
    }

    async fn buffer_and_transform<R, W>(
        &self,
        request: &ClientRequest,
        mut response: HttpHeaders,
        mut flags: TransformFlags,
        origin: &mut R,
        sink: &mut ClientSink<W>,
        entry: &AccessEntry,
    ) -> Result<(), TransferError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let loader = BufferedLoader::new(self.config.limits.max_size);
        let mut body = OriginBody::new(origin, &response);
        let loaded = loader
            .load(&mut body, &mut response, request.headers.is_http11(), sink)
            .await;

        let mut data = match loaded {
            Ok(LoadOutcome::Resident(buf)) => buf,
            Ok(LoadOutcome::Streamed {
                bytes_forwarded,
                peak_buffered,
            }) => {
                entry.set_flag(AccessFlag::TooBigForMemory);
                tracing::debug!(bytes_forwarded, peak_buffered, "Body streamed instead of transformed");
                return Ok(());
            }
            Err(LoadError::TooBigForProtocol { max_size }) => {
                return Err(TransferError::TooBigForProtocol { max_size })
            }
            Err(LoadError::Io(e)) => return Err(e.into()),
        };

        // The body is resident and dechunked from here on.
        response.clear_chunked();
        if data.is_empty() {
            write_headers(sink, &response).await?;
            return Ok(());
        }

        if flags.contains(TransformFlags::PRE_DECOMPRESS) {
            match gunzip_in_memory(&data, self.config.limits.max_uncompressed_gzip_ratio) {
                Ok(plain) => {
                    tracing::debug!(from = data.len(), to = plain.len(), "Gzip body decompressed");
                    data = plain;
                    response.clear_content_encoding();
                    response.clear_content_length();
                }
                Err(CodecError::RatioExceeded { bytes_in, bytes_out }) => {
                    entry.set_flag(AccessFlag::GzipRatioExceeded);
                    return Err(TransferError::RatioExceeded { bytes_in, bytes_out });
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Broken gzip data, forwarding unmodified");
                    flags.remove(TransformFlags::MUST_READ);
                }
            }
        } else if !response.content_encoding.is_none() {
            flags.remove(TransformFlags::MUST_READ);
        }

        if response.content_encoding.is_none() {
            data = self.transform(request, &mut response, flags, data, entry);

            if flags.contains(TransformFlags::COMPRESS) {
                let gzipped = gzip_in_memory(&data, self.config.limits.gzip_level)?;
                response.replace("Content-Encoding", "gzip");
                response.content_encoding = ContentEncoding::GZIP;
                return send_resident(&mut response, &gzipped, sink).await;
            }
        }

        send_resident(&mut response, &data, sink).await
    }

    /// In-memory transforms on a plain body. Each step hands back its
    /// input when it cannot help.
    fn transform(
        &self,
        request: &ClientRequest,
        response: &mut HttpHeaders,
        flags: TransformFlags,
        mut data: Vec<u8>,
        entry: &AccessEntry,
    ) -> Vec<u8> {
        let cfg = &self.config.transform;
        let minifier = &self.transformers.minifier;

        if flags.contains(TransformFlags::OPTIMIZE_HTML) {
            if looks_like_html(&data) {
                data = minifier.minify_html(&data, HtmlOptions::from_config(cfg));
            } else {
                tracing::debug!("Body claimed to be HTML but is not, left alone");
            }
        }
        if flags.contains(TransformFlags::OPTIMIZE_CSS) {
            data = minifier.minify_css(&data);
        }
        if flags.contains(TransformFlags::OPTIMIZE_JS) {
            data = minifier.minify_js(&data);
        }

        if flags.contains(TransformFlags::PREEMPT_DNS) {
            let hostnames = collect_hostnames(&data, cfg.preempt_dns_max);
            if !hostnames.is_empty() {
                spawn_preemptive_resolution(hostnames);
            }
        }

        if flags.contains(TransformFlags::RECOMPRESS_PICTURE) {
            let content_type = response.content_type.clone().unwrap_or_default();
            let outcome = self
                .transformers
                .images
                .recompress(&content_type, &data, request.accepts_jp2);
            match smaller_of(data.len(), outcome) {
                ImageOutcome::Recompressed {
                    content_type: new_type,
                    data: smaller,
                } => {
                    tracing::debug!(from = data.len(), to = smaller.len(), content_type = %new_type, "Image recompressed");
                    if !new_type.eq_ignore_ascii_case(&content_type) {
                        response.replace("Content-Type", &new_type);
                        response.content_type = Some(new_type);
                    }
                    data = smaller;
                }
                ImageOutcome::TooExpensive => {
                    entry.set_flag(AccessFlag::ImageTooExpensive);
                    tracing::warn!("Image too expensive to decode, not recompressed");
                }
                ImageOutcome::Unchanged => {}
            }
        }

        data
    }
}

async fn send_resident<W>(response: &mut HttpHeaders, data: &[u8], sink: &mut W) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    response.set_content_length(data.len() as u64);
    write_headers(sink, response).await?;
    sink.write_all(data).await?;
    sink.flush().await?;
    Ok(())
}

async fn replace_data<W>(
    mut response: HttpHeaders,
    sink: &mut W,
    entry: &AccessEntry,
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    // The origin body is never read; its declared size stands in for it.
    entry
        .bytes_in
        .set(response.content_length.unwrap_or(REPLACEMENT_GIF.len() as u64));

    response.set_content_length(REPLACEMENT_GIF.len() as u64);
    response.replace("Content-type", "image/gif");
    response.content_type = Some("image/gif".to_string());
    response.clear_content_encoding();
    response.remove_all("Content-Range");
    response.has_content_range = false;
    response.clear_chunked();

    write_headers(sink, &response).await?;
    sink.write_all(&REPLACEMENT_GIF).await?;
    sink.flush().await?;
    entry.set_flag(AccessFlag::DataReplaced);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChunkedDecoder;
    use crate::http::codec::read_response_headers;
    use crate::http::request::parse_request_line;
    use crate::observability::ByteCounter;
    use crate::tables::UrlTable;
    use std::io::Write as _;
    use tokio::io::AsyncReadExt;

    fn pipeline(config: ProxyConfig) -> TransferPipeline {
        let tables = Tables::from_config(&config).unwrap();
        with_tables(config, tables)
    }

    fn with_tables(config: ProxyConfig, tables: Tables) -> TransferPipeline {
        TransferPipeline::new(Arc::new(config), Arc::new(tables), Transformers::default())
    }

    fn request(line: &str, accepts_gzip: bool) -> ClientRequest {
        let mut req = parse_request_line(line, &ProxyConfig::default()).unwrap();
        req.accepts_gzip = accepts_gzip;
        req
    }

    async fn transfer(
        pipeline: &TransferPipeline,
        req: &ClientRequest,
        wire: &[u8],
    ) -> (Result<TransferOutcome, TransferError>, bool, Vec<u8>, AccessEntry) {
        let mut origin = wire;
        let headers = read_response_headers(&mut origin).await.unwrap();
        let entry = AccessEntry::new("127.0.0.1");
        let mut sink = ClientSink::new(Vec::new(), ByteCounter::default());
        let result = pipeline.run(req, headers, &mut origin, &mut sink, &entry).await;
        let started = sink.started();
        (result, started, sink.into_inner(), entry)
    }

    fn split(out: &[u8]) -> (String, Vec<u8>) {
        let end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        (String::from_utf8_lossy(&out[..end]).to_string(), out[end..].to_vec())
    }

    fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut flate2::read::GzDecoder::new(data), &mut out).unwrap();
        out
    }

    const PAGE: &str = "<html>\n  <body>\n    <p>Hello   there</p>\n  </body>\n</html>\n";

    #[tokio::test]
    async fn html_is_minified_and_gzipped() {
        let mut config = ProxyConfig::default();
        config.transform.process_html = true;
        let pipeline = pipeline(config);
        let wire = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
            PAGE.len(),
            PAGE
        );

        let (result, _, out, _) = transfer(&pipeline, &request("GET http://site/ HTTP/1.1", true), wire.as_bytes()).await;
        assert_eq!(result.unwrap().strategy, Strategy::BufferAndTransform);

        let (head, body) = split(&out);
        assert_eq!(header(&head, "Content-Encoding"), Some("gzip"));
        assert_eq!(header(&head, "Content-Length"), Some(body.len().to_string().as_str()));
        let plain = gunzip(&body);
        assert!(plain.len() < PAGE.len());
        assert!(String::from_utf8(plain).unwrap().contains("Hello"));
    }

    #[tokio::test]
    async fn text_that_is_not_html_is_left_alone() {
        let mut config = ProxyConfig::default();
        config.transform.process_html = true;
        let pipeline = pipeline(config);
        let css = "body  {\n  color: red;\n}\n";
        let wire = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
            css.len(),
            css
        );
        let (_, _, out, _) = transfer(&pipeline, &request("GET http://site/a HTTP/1.1", false), wire.as_bytes()).await;
        let (head, body) = split(&out);
        assert_eq!(body, css.as_bytes());
        assert_eq!(header(&head, "Content-Length"), Some(css.len().to_string().as_str()));
    }

    #[tokio::test]
    async fn oversized_body_passes_through_without_encoding() {
        let mut config = ProxyConfig::default();
        config.limits.max_size = 1_000;
        config.transform.process_css = true;
        let pipeline = pipeline(config);
        let payload = vec![b'a'; 5_000];
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 5000\r\n\r\n".to_vec();
        wire.extend_from_slice(&payload);

        let (result, _, out, _) = transfer(&pipeline, &request("GET http://site/x.css HTTP/1.1", false), &wire).await;
        assert_eq!(result.unwrap().strategy, Strategy::PassThroughTooLarge);
        let (head, body) = split(&out);
        assert_eq!(header(&head, "Content-Encoding"), None);
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn gzip_bomb_in_memory_fails_before_anything_is_sent() {
        let mut config = ProxyConfig::default();
        config.transform.process_html = true;
        config.limits.max_uncompressed_gzip_ratio = 2000;
        let pipeline = pipeline(config);
        let bomb = gzip(&vec![b' '; 5_000_000]);
        let mut wire = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            bomb.len()
        )
        .into_bytes();
        wire.extend_from_slice(&bomb);

        let (result, started, out, entry) =
            transfer(&pipeline, &request("GET http://site/ HTTP/1.1", false), &wire).await;
        assert!(matches!(result, Err(TransferError::RatioExceeded { .. })));
        assert!(!started);
        assert!(out.is_empty());
        assert!(entry.has_flag(AccessFlag::GzipRatioExceeded));
    }

    #[tokio::test]
    async fn unknown_length_is_stream_compressed() {
        let pipeline = pipeline(ProxyConfig::default());
        let text = "plain text ".repeat(200);
        let wire = format!("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n{}", text);

        let (result, _, out, _) = transfer(&pipeline, &request("GET http://site/t HTTP/1.1", true), wire.as_bytes()).await;
        assert_eq!(result.unwrap().strategy, Strategy::StreamCompress);
        let (head, body) = split(&out);
        assert_eq!(header(&head, "Content-Encoding"), Some("gzip"));
        assert_eq!(header(&head, "Content-Length"), None);
        assert_eq!(gunzip(&body), text.as_bytes());
    }

    #[tokio::test]
    async fn chunked_gzip_is_stream_decompressed() {
        let pipeline = pipeline(ProxyConfig::default());
        let text = b"decompressed for an old client ".repeat(100);
        let compressed = gzip(&text);
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        for part in compressed.chunks(100) {
            wire.extend(crate::codec::encode_chunk(part));
        }
        wire.extend_from_slice(b"0\r\n\r\n");

        let (result, _, out, _) = transfer(&pipeline, &request("GET http://site/t HTTP/1.1", false), &wire).await;
        assert_eq!(result.unwrap().strategy, Strategy::StreamDecompress);
        let (head, body) = split(&out);
        assert_eq!(header(&head, "Content-Encoding"), None);
        assert_eq!(header(&head, "Transfer-Encoding"), None);
        assert_eq!(body, text);
    }

    #[tokio::test]
    async fn streamed_gzip_bomb_is_truncated_and_flagged() {
        let mut config = ProxyConfig::default();
        config.limits.max_uncompressed_gzip_ratio = 2000;
        config.limits.min_uncompressed_gzip_stream_eval = 1000;
        let pipeline = pipeline(config);
        let plain_len = 5_000_000;
        let bomb = gzip(&vec![b' '; plain_len]);
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        for part in bomb.chunks(1000) {
            wire.extend(crate::codec::encode_chunk(part));
        }
        wire.extend_from_slice(b"0\r\n\r\n");

        let (result, started, out, entry) =
            transfer(&pipeline, &request("GET http://site/bomb HTTP/1.1", false), &wire).await;
        assert_eq!(result.unwrap().strategy, Strategy::StreamDecompress);
        assert!(started);
        let (head, body) = split(&out);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(body.len() < plain_len);
        assert!(body.iter().all(|b| *b == b' '));
        assert!(entry.has_flag(AccessFlag::GzipRatioExceeded));
    }

    #[tokio::test]
    async fn head_sends_headers_only() {
        let pipeline = pipeline(ProxyConfig::default());
        let wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 10\r\n\r\n0123456789";
        let (result, _, out, _) = transfer(&pipeline, &request("HEAD http://site/ HTTP/1.1", true), wire).await;
        assert_eq!(result.unwrap().strategy, Strategy::HeadOnly);
        let (head, body) = split(&out);
        assert!(body.is_empty());
        assert_eq!(header(&head, "Content-Length"), Some("10"));
        assert!(head.ends_with("Connection: close\r\nProxy-Connection: close\r\n\r\n"));
    }

    #[tokio::test]
    async fn replaced_urls_get_the_gif() {
        let config = ProxyConfig::default();
        let mut tables = Tables::from_config(&config).unwrap();
        tables.replace_data = Some(UrlTable::parse("http://ads.example.com/*\n"));
        let pipeline = with_tables(config, tables);
        let wire = b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Encoding: gzip\r\nContent-Length: 900\r\n\r\n";

        let (result, _, out, entry) =
            transfer(&pipeline, &request("GET http://ads.example.com/banner.png HTTP/1.1", true), wire).await;
        assert_eq!(result.unwrap().strategy, Strategy::ReplaceData);
        let (head, body) = split(&out);
        assert_eq!(body, REPLACEMENT_GIF);
        assert_eq!(header(&head, "Content-Type"), Some("image/gif"));
        assert_eq!(header(&head, "Content-Length"), Some("43"));
        assert_eq!(header(&head, "Content-Encoding"), None);
        assert!(entry.has_flag(AccessFlag::DataReplaced));
        assert_eq!(entry.bytes_in.get(), 900);
    }

    #[tokio::test]
    async fn partial_content_conflict_is_reported_before_sending() {
        let mut config = ProxyConfig::default();
        config.transform.process_html = true;
        let pipeline = pipeline(config);
        let wire = b"HTTP/1.1 206 Partial Content\r\nContent-Type: text/html\r\nContent-Range: bytes 0-3/10\r\nContent-Length: 4\r\n\r\nabcd";
        let (result, started, _, _) = transfer(&pipeline, &request("GET http://site/ HTTP/1.1", true), wire).await;
        assert!(matches!(result, Err(TransferError::Policy(PolicyError::PartialContentConflict))));
        assert!(!started);
    }

    #[tokio::test]
    async fn oversized_chunked_body_needs_http11() {
        let mut config = ProxyConfig::default();
        config.limits.max_size = 1_000;
        config.transform.process_html = true;
        let pipeline = pipeline(config);
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        for _ in 0..10 {
            wire.extend(crate::codec::encode_chunk(&[b'x'; 500]));
        }
        wire.extend_from_slice(b"0\r\n\r\n");

        let (result, started, _, _) = transfer(&pipeline, &request("GET http://site/ HTTP/1.0", false), &wire).await;
        assert!(matches!(result, Err(TransferError::TooBigForProtocol { .. })));
        assert!(!started);

        let (result, _, out, entry) = transfer(&pipeline, &request("GET http://site/ HTTP/1.1", false), &wire).await;
        assert_eq!(result.unwrap().strategy, Strategy::BufferAndTransform);
        assert!(entry.has_flag(AccessFlag::TooBigForMemory));
        let (_, body) = split(&out);
        let mut decoded = Vec::new();
        ChunkedDecoder::new(&body[..]).read_to_end(&mut decoded).await.unwrap();
        assert_eq!(decoded.len(), 5_000);
    }

    #[tokio::test]
    async fn simple_response_is_forwarded_verbatim() {
        let pipeline = pipeline(ProxyConfig::default());
        let (result, _, out, _) =
            transfer(&pipeline, &request("GET http://site/ HTTP/1.1", true), b"<h1>old school</h1>").await;
        assert_eq!(result.unwrap().strategy, Strategy::SimpleResponse);
        assert_eq!(out, b"<h1>old school</h1>");
    }
}
