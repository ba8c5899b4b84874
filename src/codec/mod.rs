//! Body codecs.
//!
//! # Data Flow
//! ```text
//! origin body ──► chunked.rs ChunkedDecoder (when Transfer-Encoding: chunked)
//!                     │
//!                     ├──► gzip.rs compress / decompress ──► client
//!                     └──► pipeline BufferedLoader
//!
//! oversized buffered body (HTTP/1.1 client) ──► chunked.rs write_chunk ──► client
//! ```
//!
//! # Design Decisions
//! - Codecs are plain functions over `AsyncRead`/`AsyncWrite`; they know
//!   nothing about headers or policy
//! - Decompression is always ratio-guarded, there is no unguarded entry point

pub mod chunked;
pub mod gzip;

pub use chunked::{encode_chunk, write_chunk, write_last_chunk, ChunkedDecoder};
pub use gzip::{
    compress, decompress, gunzip_in_memory, gzip_in_memory, CodecError, CodecStats, GzipEncoder,
    RatioGuard,
};
