//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every subsystem:
//!     → tracing events (diagnostics) → logging.rs subscriber
//!
//! Every connection:
//!     → access_log.rs AccessEntry (flags, bytes, method, url)
//!     → written once by the connection supervisor
//!     → metrics.rs counters (requests by strategy, bytes, connections)
//! ```
//!
//! # Design Decisions
//! - Access records are separate from diagnostics: one fixed-format line
//!   per request, suitable for traffic accounting
//! - Metrics are optional; recording without an exporter is free

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessEntry, AccessFlag, AccessLog, AccessLogWriter, ByteCounter};
