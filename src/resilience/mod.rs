//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Origin connect:
//!     → timeouts.rs with_deadline (connect_secs)
//!
//! Client and origin streams:
//!     → timeouts.rs IdleTimeout (idle_secs per stalled read or write)
//!     → TimedOut error → 408 if nothing was sent, flag Z either way
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every socket operation has a deadline
//! - Nothing is retried: a failed origin or client ends the session
//! - Deadlines bound each step of a transfer, never its total duration

pub mod timeouts;

pub use timeouts::{with_deadline, IdleTimeout};
