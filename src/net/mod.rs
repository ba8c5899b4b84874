//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs   (accept, max_connections permit)
//!     → connection.rs (id, live-session tracking)
//!     → http::server  (session)
//!     → upstream.rs   (origin or next-proxy connect, bounded by connect_secs)
//!     → tunnel.rs     (CONNECT and unprocessed URLs only)
//! ```
//!
//! # Design Decisions
//! - The permit is taken before accept, so the limit is backpressure
//!   rather than rejection
//! - Every session is tracked so shutdown can wait for it

pub mod connection;
pub mod listener;
pub mod tunnel;
pub mod upstream;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use tunnel::{tunnel, TunnelStats};
pub use upstream::{connect_origin, ConnectError, Upstream};
