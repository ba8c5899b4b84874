//! In-memory body transforms used by the buffered pipeline path.
//!
//! # Data Flow
//! ```text
//! resident body
//!     → sniff.rs looks_like_html    (guards the HTML minifier)
//!     → minify.rs Minifier          (HTML / CSS / JS)
//!     → dns.rs collect_hostnames    → detached resolver task
//!     → image.rs ImageCodec         (pictures, smaller result wins)
//! ```
//!
//! # Design Decisions
//! - Minifier and image codec are trait objects so deployments can plug in
//!   heavier implementations without touching the pipeline
//! - Every transform is infallible from the pipeline's point of view: a
//!   transform that cannot help returns its input

pub mod dns;
pub mod image;
pub mod minify;
pub mod sniff;

use std::sync::Arc;

pub use image::{ImageCodec, ImageOutcome, PassthroughImageCodec};
pub use minify::{HtmlOptions, Minifier, WhitespaceMinifier};
pub use sniff::looks_like_html;

/// The pluggable transforms a pipeline runs with.
#[derive(Clone)]
pub struct Transformers {
    pub minifier: Arc<dyn Minifier>,
    pub images: Arc<dyn ImageCodec>,
}

impl Default for Transformers {
    fn default() -> Self {
        Self {
            minifier: Arc::new(WhitespaceMinifier),
            images: Arc::new(PassthroughImageCodec),
        }
    }
}

impl std::fmt::Debug for Transformers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformers").finish_non_exhaustive()
    }
}
