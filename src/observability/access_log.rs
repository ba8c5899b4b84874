//! Per-request access records.
//!
//! # Responsibilities
//! - Accumulate what happened to one request (flags, byte counts)
//! - Render the classic one-line record and write it out once
//!
//! # Design Decisions
//! - The entry is shared between the session task and its supervisor, so
//!   every field is atomic or set-once; a panicking session still leaves a
//!   usable entry behind
//! - Flags print in a fixed order regardless of when they were raised
//! - Sessions never touch the file: records go over a bounded channel to a
//!   single writer task using `tokio::fs`; a full channel drops the record

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Records queued for the writer before new ones are dropped.
const ACCESS_LOG_BACKLOG: usize = 4096;

/// Something notable that happened while serving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFlag {
    Transparent,
    Conventional,
    TosChanged,
    Connect,
    BrokenPipe,
    ImageTooExpensive,
    GzipRatioExceeded,
    Timeout,
    NotProcessed,
    TooBigForMemory,
    DataReplaced,
    Shutdown,
    SoftwareBug,
}

impl AccessFlag {
    /// Print order.
    pub const ALL: [AccessFlag; 13] = [
        AccessFlag::Transparent,
        AccessFlag::Conventional,
        AccessFlag::TosChanged,
        AccessFlag::Connect,
        AccessFlag::BrokenPipe,
        AccessFlag::ImageTooExpensive,
        AccessFlag::GzipRatioExceeded,
        AccessFlag::Timeout,
        AccessFlag::NotProcessed,
        AccessFlag::TooBigForMemory,
        AccessFlag::DataReplaced,
        AccessFlag::Shutdown,
        AccessFlag::SoftwareBug,
    ];

    pub fn as_char(self) -> char {
        match self {
            AccessFlag::Transparent => 'T',
            AccessFlag::Conventional => 'P',
            AccessFlag::TosChanged => 'Q',
            AccessFlag::Connect => 'S',
            AccessFlag::BrokenPipe => 'B',
            AccessFlag::ImageTooExpensive => 'K',
            AccessFlag::GzipRatioExceeded => 'G',
            AccessFlag::Timeout => 'Z',
            AccessFlag::NotProcessed => 'N',
            AccessFlag::TooBigForMemory => 'W',
            AccessFlag::DataReplaced => 'R',
            AccessFlag::Shutdown => 'X',
            AccessFlag::SoftwareBug => '*',
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Shared byte counter.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set(&self, n: u64) {
        self.0.store(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Access record for one client connection.
#[derive(Debug)]
pub struct AccessEntry {
    started: Instant,
    started_at: SystemTime,
    client: String,
    flags: AtomicU32,
    pub bytes_in: ByteCounter,
    pub bytes_out: ByteCounter,
    request: OnceLock<(String, String)>,
}

impl AccessEntry {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            started_at: SystemTime::now(),
            client: client.into(),
            flags: AtomicU32::new(0),
            bytes_in: ByteCounter::default(),
            bytes_out: ByteCounter::default(),
            request: OnceLock::new(),
        }
    }

    pub fn set_flag(&self, flag: AccessFlag) {
        self.flags.fetch_or(flag.bit(), Ordering::Relaxed);
    }

    pub fn has_flag(&self, flag: AccessFlag) -> bool {
        self.flags.load(Ordering::Relaxed) & flag.bit() != 0
    }

    /// Record method and URL. Only the first call has an effect.
    pub fn set_request(&self, method: &str, url: &str) {
        let _ = self.request.set((method.to_string(), url.to_string()));
    }

    pub fn flags_string(&self) -> String {
        AccessFlag::ALL
            .iter()
            .filter(|flag| self.has_flag(**flag))
            .map(|flag| flag.as_char())
            .collect()
    }

    /// Entries are only written once a request line has been accepted.
    pub fn should_log(&self) -> bool {
        self.has_flag(AccessFlag::Transparent) || self.has_flag(AccessFlag::Conventional)
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

impl fmt::Display for AccessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let since_epoch = self.started_at.duration_since(UNIX_EPOCH).unwrap_or_default();
        let (method, url) = self
            .request
            .get()
            .map(|(m, u)| (m.as_str(), u.as_str()))
            .unwrap_or(("-", "-"));
        write!(
            f,
            "{}.{:03} {:>6} {:>15} {:>2} {:>6} {:>6} {} {}",
            since_epoch.as_secs(),
            since_epoch.subsec_millis(),
            self.elapsed_ms(),
            self.client,
            self.flags_string(),
            self.bytes_in.get(),
            self.bytes_out.get(),
            method,
            url
        )
    }
}

/// Destination of access records.
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    records: Option<mpsc::Sender<String>>,
}

/// The task appending records to the access log file.
#[derive(Debug)]
pub struct AccessLogWriter {
    task: JoinHandle<()>,
}

impl AccessLog {
    /// Append to `path`, or emit on the `access_log` tracing target.
    ///
    /// With a file, the returned writer must be kept until every
    /// [`AccessLog`] clone is gone; [`AccessLogWriter::finish`] then waits
    /// for the backlog to reach the file.
    pub async fn open(path: Option<&Path>) -> io::Result<(Self, Option<AccessLogWriter>)> {
        let Some(path) = path else {
            return Ok((Self::default(), None));
        };
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        let (tx, rx) = mpsc::channel(ACCESS_LOG_BACKLOG);
        let task = tokio::spawn(write_records(file, rx));
        Ok((Self { records: Some(tx) }, Some(AccessLogWriter { task })))
    }

    /// Queue `entry` if it qualifies. Failures are logged, never raised.
    pub fn record(&self, entry: &AccessEntry) {
        if !entry.should_log() {
            return;
        }
        let line = entry.to_string();
        match &self.records {
            Some(records) => {
                if let Err(e) = records.try_send(line) {
                    tracing::warn!(error = %e, "Access record dropped");
                }
            }
            None => tracing::info!(target: "access_log", "{}", line),
        }
    }
}

impl AccessLogWriter {
    /// Wait up to `limit` for queued records to be written. Returns
    /// `false` when the writer was still busy.
    pub async fn finish(self, limit: Duration) -> bool {
        match tokio::time::timeout(limit, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Access log writer failed");
                true
            }
            Err(_) => false,
        }
    }
}

/// Append queued lines until every sender is gone, batching what is
/// already waiting into one write.
async fn write_records(mut file: File, mut records: mpsc::Receiver<String>) {
    while let Some(first) = records.recv().await {
        let mut batch = first;
        batch.push('\n');
        while let Ok(line) = records.try_recv() {
            batch.push_str(&line);
            batch.push('\n');
        }
        if let Err(e) = file.write_all(batch.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write access log");
            continue;
        }
        if let Err(e) = file.flush().await {
            tracing::warn!(error = %e, "Failed to flush access log");
        }
    }
}
