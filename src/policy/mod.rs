//! Content transformation policy.
//!
//! # Data Flow
//! ```text
//! ClientRequest (accepts gzip? user agent?)
//! + response HttpHeaders (content type, encoding, range)
//! + TransformConfig + lossless content-type table
//!     → engine.rs ContentPolicy::decide
//!     → Decision { flags, class } (read-only afterwards)
//!     → TransferPipeline picks a strategy from it
//! ```
//!
//! # Design Decisions
//! - Flags are a plain bitset; the pipeline tests combinations of them
//! - Partial content that would be rewritten is a 409, not a silent pass

pub mod engine;
pub mod flags;

pub use engine::{ContentPolicy, Decision, PolicyError};
pub use flags::{ContentClass, TransformFlags};
