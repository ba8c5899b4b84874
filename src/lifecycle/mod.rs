//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → sessions get shutdown_grace_secs
//!             → survivors aborted and logged with flag X
//! ```
//!
//! # Design Decisions
//! - No reload: configuration is fixed for the life of the process
//! - Shutdown has a deadline; nothing waits on a stuck session forever

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::wait_for_signal;
