//! Proxy server: accept loop, per-connection supervisor and session.
//!
//! # Responsibilities
//! - Accept clients under the connection limit
//! - Run each session in its own task, isolated from the others
//! - Read and admit the request, contact the origin, hand the response to
//!   the transfer pipeline
//! - Write one access record per connection, whatever happened
//!
//! # Design Decisions
//! - The session runs in a nested task; the supervisor sees a panic as a
//!   `JoinError` and still writes the access record (flag `*`)
//! - On shutdown sessions get `shutdown_grace_secs`, then are aborted and
//!   logged with flag `X`
//! - Error pages are only sent while the client has received nothing

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::codec::{write_chunk, write_last_chunk, ChunkedDecoder};
use crate::config::ProxyConfig;
use crate::http::codec::{read_response_headers, write_headers, HeaderError};
use crate::http::request::{read_request, ProxyMode, RequestBody, RequestError};
use crate::http::response::{ErrorPage, ErrorPages};
use crate::lifecycle::ShutdownSignal;
use crate::net::{connect_origin, tunnel, ConnectError, ConnectionTracker, Listener, ListenerError, Upstream};
use crate::observability::metrics;
use crate::observability::{AccessEntry, AccessFlag, AccessLog};
use crate::pipeline::{ClientSink, CountingReader, Strategy, TransferError, TransferPipeline};
use crate::resilience::IdleTimeout;
use crate::security::admit;
use crate::tables::Tables;
use crate::transform::Transformers;

/// Reply sent to a client once its CONNECT tunnel is open.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.0 200 Connection established\r\n\r\n";

type ClientReader = BufReader<IdleTimeout<OwnedReadHalf>>;
type ClientWriter = ClientSink<IdleTimeout<OwnedWriteHalf>>;

/// State shared by every session.
#[derive(Debug)]
struct SessionContext {
    config: Arc<ProxyConfig>,
    pipeline: TransferPipeline,
    error_pages: ErrorPages,
    access_log: AccessLog,
}

/// The proxy server.
pub struct HttpServer {
    ctx: Arc<SessionContext>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(
        config: Arc<ProxyConfig>,
        tables: Arc<Tables>,
        transformers: Transformers,
        access_log: AccessLog,
    ) -> Self {
        let error_pages = ErrorPages::load(&config.error_pages);
        let pipeline = TransferPipeline::new(Arc::clone(&config), tables, transformers);
        Self {
            ctx: Arc::new(SessionContext {
                config,
                pipeline,
                error_pages,
                access_log,
            }),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Tracker of the sessions this server runs.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve until `shutdown` fires, then wait for sessions to finish.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> Result<(), ListenerError> {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            max_connections = listener.max_connections(),
            "Proxy server starting"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let guard = self.tracker.track();
            let span = tracing::error_span!("conn", id = %guard.id(), peer = %peer);
            let ctx = Arc::clone(&self.ctx);
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    supervise(ctx, stream, peer, shutdown).await;
                    drop(guard);
                    drop(permit);
                }
                .instrument(span),
            );
        }

        let grace = Duration::from_secs(self.ctx.config.timeouts.shutdown_grace_secs);
        tracing::info!(
            active = self.tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Stopped accepting, draining sessions"
        );
        // Supervisors abort their sessions at the deadline; allow for the
        // access records to be written.
        if !self.tracker.wait_drained(grace + Duration::from_secs(1)).await {
            tracing::warn!(active = self.tracker.active_count(), "Sessions still open at exit");
        }
        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Run one session and write its access record.
async fn supervise(ctx: Arc<SessionContext>, stream: TcpStream, peer: SocketAddr, mut shutdown: ShutdownSignal) {
    let entry = Arc::new(AccessEntry::new(peer.ip().to_string()));
    let mut session = tokio::spawn(
        serve(Arc::clone(&ctx), stream, Arc::clone(&entry)).in_current_span(),
    );

    let joined = tokio::select! {
        joined = &mut session => joined,
        _ = shutdown.recv() => {
            let grace = Duration::from_secs(ctx.config.timeouts.shutdown_grace_secs);
            match tokio::time::timeout(grace, &mut session).await {
                Ok(joined) => joined,
                Err(_) => {
                    session.abort();
                    entry.set_flag(AccessFlag::Shutdown);
                    tracing::info!("Session aborted by shutdown");
                    session.await
                }
            }
        }
    };

    if let Err(e) = joined {
        if e.is_panic() {
            entry.set_flag(AccessFlag::SoftwareBug);
            tracing::error!(error = %e, "Session panicked");
        }
    }

    metrics::record_bytes(entry.bytes_in.get(), entry.bytes_out.get());
    ctx.access_log.record(&entry);
}

async fn serve(ctx: Arc<SessionContext>, stream: TcpStream, entry: Arc<AccessEntry>) {
    match session(&ctx, stream, &entry).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            entry.set_flag(AccessFlag::Timeout);
            tracing::info!("Transfer timed out");
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) => {
            entry.set_flag(AccessFlag::BrokenPipe);
            tracing::debug!(error = %e, "Connection broken");
        }
        Err(e) => tracing::debug!(error = %e, "Session ended with error"),
    }
}

async fn session(ctx: &SessionContext, stream: TcpStream, entry: &AccessEntry) -> io::Result<()> {
    let config = &ctx.config;
    let idle = Duration::from_secs(config.timeouts.idle_secs);
    let (read_half, write_half) = stream.into_split();
    let mut client_in: ClientReader = BufReader::new(IdleTimeout::new(read_half, idle));
    let mut client_out: ClientWriter = ClientSink::new(IdleTimeout::new(write_half, idle), entry.bytes_out.clone());

    let request = match read_request(&mut client_in, config).await {
        Ok(request) => request,
        Err(e) => return reject_request(ctx, &mut client_out, e).await,
    };

    entry.set_flag(match request.mode {
        ProxyMode::Transparent => AccessFlag::Transparent,
        ProxyMode::Conventional => AccessFlag::Conventional,
    });
    entry.set_request(request.method(), request.log_url());
    tracing::debug!(method = request.method(), url = request.log_url(), "Request received");

    if let Err(e) = admit(&request, &config.proxy) {
        tracing::info!(error = %e, "Request refused");
        return send_page(ctx, &mut client_out, ErrorPage::from_admission_error(&e)).await;
    }

    if request.is_connect {
        let upstream = Upstream::resolve_route(&request.headers.host, request.headers.port, None);
        let origin = match connect_origin(&upstream, Duration::from_secs(config.timeouts.connect_secs)).await {
            Ok(origin) => origin,
            Err(e) => return refuse_connect(ctx, &mut client_out, e).await,
        };
        entry.set_flag(AccessFlag::Connect);
        client_out.write_all(CONNECT_ESTABLISHED).await?;
        client_out.flush().await?;
        let (origin_read, origin_write) = origin.into_split();
        let origin_write = IdleTimeout::new(origin_write, idle);
        return relay_blind(client_in, client_out, origin_read, origin_write, idle, entry).await;
    }

    let early = ctx.pipeline.request_strategy(&request);
    if early == Some(Strategy::Deny) {
        tracing::info!("Locally forbidden URL");
        metrics::record_request(Strategy::Deny.as_str());
        let page = ErrorPage::from_transfer_error(&TransferError::Denied);
        return match page {
            Some(page) => send_page(ctx, &mut client_out, page).await,
            None => Ok(()),
        };
    }

    let mut upstream_request = request.clone();
    upstream_request.prepare_upstream(config);
    let upstream = Upstream::resolve_route(
        &request.headers.host,
        request.headers.port,
        config.proxy.next_proxy.as_deref(),
    );
    let origin = match connect_origin(&upstream, Duration::from_secs(config.timeouts.connect_secs)).await {
        Ok(origin) => origin,
        Err(e) => return refuse_connect(ctx, &mut client_out, e).await,
    };

    let (origin_read, origin_write) = origin.into_split();
    let mut origin_write = IdleTimeout::new(origin_write, idle);
    write_headers(&mut origin_write, &upstream_request.headers).await?;

    if early == Some(Strategy::NoProcessing) {
        // The request body, if any, travels through the tunnel.
        entry.set_flag(AccessFlag::NotProcessed);
        metrics::record_request(Strategy::NoProcessing.as_str());
        return relay_blind(client_in, client_out, origin_read, origin_write, idle, entry).await;
    }

    forward_request_body(&mut client_in, &mut origin_write, request.body).await?;

    let mut origin_in = CountingReader::new(
        BufReader::new(IdleTimeout::new(origin_read, idle)),
        entry.bytes_in.clone(),
    );
    let response = match read_response_headers(&mut origin_in).await {
        Ok(response) => response,
        Err(e) => {
            tracing::info!(error = %e, "Bad response from origin");
            send_page(ctx, &mut client_out, ErrorPage::from_origin_error(&e)).await?;
            return match e {
                HeaderError::Io(err) if err.kind() == io::ErrorKind::TimedOut => Err(err),
                _ => Ok(()),
            };
        }
    };
    // Only body bytes count as received.
    entry.bytes_in.set(0);

    match ctx
        .pipeline
        .run(&request, response, &mut origin_in, &mut client_out, entry)
        .await
    {
        Ok(outcome) => {
            tracing::debug!(strategy = %outcome.strategy, "Transfer complete");
        }
        Err(error) => {
            if !client_out.started() {
                if let Some(page) = ErrorPage::from_transfer_error(&error) {
                    send_page(ctx, &mut client_out, page).await?;
                }
            }
            match error {
                TransferError::Io(e) => return Err(e),
                other => tracing::info!(error = %other, "Transfer failed"),
            }
        }
    }

    if let Err(e) = client_out.shutdown().await {
        tracing::debug!(error = %e, "Closing client connection failed");
    }
    Ok(())
}

async fn send_page(ctx: &SessionContext, client: &mut ClientWriter, page: ErrorPage) -> io::Result<()> {
    ctx.error_pages.send(client, &page).await
}

async fn reject_request(ctx: &SessionContext, client: &mut ClientWriter, error: RequestError) -> io::Result<()> {
    tracing::debug!(error = %error, "Unusable request");
    let timed_out = matches!(
        &error,
        RequestError::Header(HeaderError::Io(e)) if e.kind() == io::ErrorKind::TimedOut
    );
    if let Some(page) = ErrorPage::from_request_error(&error) {
        send_page(ctx, client, page).await?;
    }
    if timed_out {
        return Err(io::ErrorKind::TimedOut.into());
    }
    Ok(())
}

async fn refuse_connect(ctx: &SessionContext, client: &mut ClientWriter, error: ConnectError) -> io::Result<()> {
    tracing::info!(error = %error, "Origin unreachable");
    send_page(ctx, client, ErrorPage::from_connect_error(&error)).await?;
    match error {
        ConnectError::TimedOut { .. } => Err(io::ErrorKind::TimedOut.into()),
        _ => Ok(()),
    }
}

/// Relay the request body the client announced.
async fn forward_request_body<R, W>(client: &mut R, origin: &mut W, body: RequestBody) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match body {
        RequestBody::None => {}
        RequestBody::Length(len) => {
            let copied = tokio::io::copy(&mut (&mut *client).take(len), origin).await?;
            if copied < len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "client closed before sending the whole body",
                ));
            }
        }
        RequestBody::Chunked => {
            let mut decoder = ChunkedDecoder::new(&mut *client);
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                let n = decoder.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                write_chunk(origin, &buf[..n]).await?;
            }
            write_last_chunk(origin).await?;
        }
    }
    origin.flush().await
}

/// Tunnel raw bytes between client and origin, starting with whatever the
/// client already sent past its request head.
async fn relay_blind(
    client_in: ClientReader,
    mut client_out: ClientWriter,
    origin_read: OwnedReadHalf,
    mut origin_write: IdleTimeout<OwnedWriteHalf>,
    idle: Duration,
    entry: &AccessEntry,
) -> io::Result<()> {
    let pending = client_in.buffer().to_vec();
    let mut client_read = client_in.into_inner().into_inner();
    let mut origin_read = CountingReader::new(origin_read, entry.bytes_in.clone());
    if !pending.is_empty() {
        origin_write.write_all(&pending).await?;
        origin_write.flush().await?;
    }

    let stats = tunnel(&mut client_read, &mut client_out, &mut origin_read, &mut origin_write, idle).await?;
    tracing::debug!(upstream = stats.upstream, downstream = stats.downstream, "Tunnel finished");
    Ok(())
}
