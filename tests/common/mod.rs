//! Shared utilities for integration tests: raw-TCP mock origins and a proxy
//! launcher.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ziproxy::config::ProxyConfig;
use ziproxy::lifecycle::Shutdown;
use ziproxy::net::Listener;
use ziproxy::observability::AccessLog;
use ziproxy::tables::Tables;
use ziproxy::transform::Transformers;
use ziproxy::HttpServer;

/// A mock origin answering every connection with the same bytes.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockOrigin {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start an origin that reads a request head, writes `response` and closes.
pub async fn start_origin(response: Vec<u8>) -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let response = Arc::new(response);

    {
        let hits = Arc::clone(&hits);
        let requests = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                hits.fetch_add(1, Ordering::SeqCst);
                let requests = Arc::clone(&requests);
                let response = Arc::clone(&response);
                tokio::spawn(async move {
                    let head = read_head(&mut socket).await;
                    requests.lock().unwrap().push(head);
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
    }

    MockOrigin { addr, hits, requests }
}

/// Start an origin that echoes every byte it receives.
pub async fn start_echo_origin() -> MockOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    {
        let hits = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                hits.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.into_split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
    }

    MockOrigin {
        addr,
        hits,
        requests: Arc::new(Mutex::new(Vec::new())),
    }
}

async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// A running proxy.
pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub access_log: PathBuf,
    pub shutdown: Shutdown,
}

impl ProxyHandle {
    /// Access log lines, waiting up to a second for `expected` of them.
    pub async fn access_log_lines(&self, expected: usize) -> Vec<String> {
        for _ in 0..50 {
            let text = std::fs::read_to_string(&self.access_log).unwrap_or_default();
            let lines: Vec<String> = text.lines().map(str::to_string).collect();
            if lines.len() >= expected {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("access log never reached {} lines", expected);
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
        let _ = std::fs::remove_file(&self.access_log);
    }
}

/// Defaults suitable for tests: loopback listener, short timeouts.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.connect_secs = 5;
    config.timeouts.idle_secs = 5;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

pub async fn start_proxy(config: ProxyConfig) -> ProxyHandle {
    let tables = Tables::from_config(&config).unwrap();
    start_proxy_with_tables(config, tables).await
}

pub async fn start_proxy_with_tables(mut config: ProxyConfig, tables: Tables) -> ProxyHandle {
    static NEXT_LOG: AtomicUsize = AtomicUsize::new(0);
    let access_log = std::env::temp_dir().join(format!(
        "ziproxy-access-{}-{}.log",
        std::process::id(),
        NEXT_LOG.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_file(&access_log);
    config.observability.access_log = Some(access_log.clone());

    let (access_log_sink, _writer) = AccessLog::open(Some(&access_log)).await.unwrap();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(
        Arc::new(config),
        Arc::new(tables),
        Transformers::default(),
        access_log_sink,
    );

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    ProxyHandle {
        addr,
        access_log,
        shutdown,
    }
}

/// Send raw bytes to the proxy and read until it closes.
pub async fn send_raw(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// Split a response into its head (as text) and body.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .unwrap_or(raw.len());
    (String::from_utf8_lossy(&raw[..end]).into_owned(), raw[end..].to_vec())
}

/// Value of the first header named `name` in `head`.
pub fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}

/// An origin response with a Content-Length body.
pub fn origin_response(content_type: &str, extra: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}\r\n",
        content_type,
        body.len(),
        extra
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
