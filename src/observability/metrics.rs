//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ziproxy_requests_total` (counter): requests by handling strategy
//! - `ziproxy_bytes_in_total` (counter): bytes received from origins
//! - `ziproxy_bytes_out_total` (counter): bytes sent to clients
//! - `ziproxy_active_connections` (gauge): open client connections
//!
//! # Design Decisions
//! - Recording is unconditional; without an installed exporter the
//!   `metrics` macros are no-ops

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const REQUESTS_TOTAL: &str = "ziproxy_requests_total";
pub const BYTES_IN_TOTAL: &str = "ziproxy_bytes_in_total";
pub const BYTES_OUT_TOTAL: &str = "ziproxy_bytes_out_total";
pub const ACTIVE_CONNECTIONS: &str = "ziproxy_active_connections";

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter"),
    }
}

/// Count one handled request under its strategy label.
pub fn record_request(strategy: &'static str) {
    metrics::counter!(REQUESTS_TOTAL, "strategy" => strategy).increment(1);
}

pub fn record_bytes(bytes_in: u64, bytes_out: u64) {
    metrics::counter!(BYTES_IN_TOTAL).increment(bytes_in);
    metrics::counter!(BYTES_OUT_TOTAL).increment(bytes_out);
}

pub fn connection_opened() {
    metrics::gauge!(ACTIVE_CONNECTIONS).increment(1.0);
}

pub fn connection_closed() {
    metrics::gauge!(ACTIVE_CONNECTIONS).decrement(1.0);
}
