//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed ClientRequest:
//!     → admission.rs (CONNECT allowed? destination port allowed?)
//!     → 403 page, origin never contacted
//!     → or hand off to the session (tunnel or HTTP relay)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a request is refused before any outbound connection
//! - Empty port lists mean no restriction

pub mod admission;

pub use admission::{admit, AdmissionError};
