//! Ziproxy: a compressing HTTP forward and transparent proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server (session)
//!                                     │  http::request   parse, admit (security)
//!                                     │  net::upstream   connect origin / next proxy
//!                                     ▼
//!                               pipeline::TransferPipeline
//!                                     │  policy   flags per response
//!                                     │  strategy one of ten
//!                                     │  codec    chunked, gzip
//!                                     │  transform minify, images, DNS
//!                                     ▼
//!     Client ◀── pipeline::ClientSink ◀── origin response
//!
//!     Cross-cutting: config, tables, resilience (timeouts),
//!                    observability (tracing, access log, metrics), lifecycle
//! ```

// Core subsystems
pub mod codec;
pub mod config;
pub mod http;
pub mod net;
pub mod pipeline;
pub mod policy;
pub mod tables;
pub mod transform;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
