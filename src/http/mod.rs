//! HTTP/1.x protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → codec.rs    (header lines, response heads, serialization)
//!     → headers.rs  (HttpHeaders: ordered lines + indexed fields)
//!     → request.rs  (request line, destination, Via, upstream rewrites)
//!     → server.rs   (session: admission, origin, transfer pipeline)
//!     → response.rs (error pages when nothing has been sent yet)
//! ```
//!
//! # Design Decisions
//! - Hand-written HTTP/1.x: the proxy has to forward header lines it does
//!   not understand byte for byte, and to serve HTTP/0.9 origins
//! - Every connection carries exactly one request (`Connection: close`)

pub mod codec;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use headers::{ContentEncoding, HttpHeaders};
pub use request::{ClientRequest, RequestError};
pub use response::{ErrorPage, ErrorPages};
pub use server::HttpServer;
