//! Response transfer pipeline.
//!
//! # Data Flow
//! ```text
//! origin response head + ClientRequest
//!     → ContentPolicy::decide             (flags, or 409)
//!     → strategy.rs select                (exactly one of ten)
//!     → transfer.rs TransferPipeline      (drives the strategy)
//!         ├─ body.rs OriginBody          (Content-Length / chunked / EOF framing)
//!         ├─ codec::compress/decompress  (streaming gzip)
//!         ├─ loader.rs BufferedLoader    (bounded in-memory body)
//!         └─ transform::*                (minify, DNS, images)
//!     → sink.rs ClientSink                (counts bytes, knows if a response started)
//! ```
//!
//! # Design Decisions
//! - Strategy selection is a pure function over a small input struct, so
//!   exclusivity can be tested exhaustively
//! - Only the buffered strategy holds a body in memory, bounded by
//!   `max_size` plus one read increment

pub mod body;
pub mod loader;
pub mod sink;
pub mod strategy;
pub mod transfer;

pub use body::{forward_raw, OriginBody};
pub use loader::{BufferedLoader, LoadError, LoadOutcome};
pub use sink::{ClientSink, CountingReader};
pub use strategy::{select, Strategy, StrategyInputs};
pub use transfer::{TransferError, TransferOutcome, TransferPipeline, REPLACEMENT_GIF};
