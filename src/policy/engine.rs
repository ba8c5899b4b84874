//! Per-response transformation decision.
//!
//! # Responsibilities
//! - Classify the response from its Content-Type
//! - Turn config toggles and client capabilities into TransformFlags
//! - Refuse to rewrite partial content
//!
//! # Design Decisions
//! - `decide` is a pure function of its inputs (same inputs, same flags)
//! - Flags are only added in the first phase and only cleared afterwards
//! - Content-Range is evaluated before the MSIE workaround

use thiserror::Error;

use crate::config::{ProxyConfig, TransformConfig};
use crate::http::headers::HttpHeaders;
use crate::http::request::ClientRequest;
use crate::policy::flags::{ContentClass, TransformFlags};
use crate::tables::{ContentTypeTable, Tables};

/// Conflicts detected while deciding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("client has requested partial content for a dynamically-optimized Content-Type")]
    PartialContentConflict,
}

/// Result of the policy for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub flags: TransformFlags,
    pub class: ContentClass,
}

impl Decision {
    pub fn untouched() -> Self {
        Self {
            flags: TransformFlags::NONE,
            class: ContentClass::Other,
        }
    }
}

/// Content policy bound to one configuration.
#[derive(Debug, Clone, Copy)]
pub struct ContentPolicy<'a> {
    transform: &'a TransformConfig,
    lossless: &'a ContentTypeTable,
}

impl<'a> ContentPolicy<'a> {
    pub fn new(config: &'a ProxyConfig, tables: &'a Tables) -> Self {
        Self {
            transform: &config.transform,
            lossless: &tables.lossless_compress,
        }
    }

    /// Compute the flags for `response` as requested by `client`.
    pub fn decide(&self, client: &ClientRequest, response: &HttpHeaders) -> Result<Decision, PolicyError> {
        let cfg = self.transform;
        let Some(content_type) = response.content_type.as_deref() else {
            return Ok(Decision::untouched());
        };

        let class = ContentClass::from_content_type(content_type);
        let mut flags = TransformFlags::NONE;

        if cfg.gzip && self.lossless.matches_content_type(content_type) {
            flags |= TransformFlags::COMPRESS;
        }

        let recompress = match class {
            ContentClass::Jpeg => cfg.process_jpg,
            ContentClass::Png => cfg.process_png,
            ContentClass::Gif => cfg.process_gif,
            ContentClass::Jp2k => cfg.process_jp2,
            _ => false,
        };
        if recompress {
            flags |= TransformFlags::RECOMPRESS_PICTURE;
        }

        match class {
            ContentClass::Html if cfg.process_html => flags |= TransformFlags::OPTIMIZE_HTML,
            ContentClass::Css if cfg.process_css => flags |= TransformFlags::OPTIMIZE_CSS,
            ContentClass::JavaScript if cfg.process_js => flags |= TransformFlags::OPTIMIZE_JS,
            _ => {}
        }
        if class == ContentClass::Html && cfg.preempt_dns {
            flags |= TransformFlags::PREEMPT_DNS;
        }

        if response.content_encoding.is_gzip_only() && cfg.decompress_incoming_gzip {
            flags |= TransformFlags::PRE_DECOMPRESS;
        }

        // From here on flags are only cleared.

        if !client.accepts_gzip {
            flags.remove(TransformFlags::COMPRESS);
        }

        if response.has_content_range {
            if flags.intersects(TransformFlags::CONTENT_MODIFICATION) {
                return Err(PolicyError::PartialContentConflict);
            }
            flags.remove(TransformFlags::PREEMPT_DNS);
        }

        if cfg.msie_friendly_errors_workaround && is_msie_error(client, response) {
            tracing::debug!("MSIE friendly error pages workaround applied");
            flags.remove(TransformFlags::CONTENT_MODIFICATION);
        }

        Ok(Decision { flags, class })
    }
}

fn is_msie_error(client: &ClientRequest, response: &HttpHeaders) -> bool {
    let status_is_error = matches!(response.status, Some(code) if (400..600).contains(&code));
    status_is_error
        && client
            .user_agent()
            .map(|ua| ua.contains("; MSIE "))
            .unwrap_or(false)
}
