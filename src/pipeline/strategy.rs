//! Handling strategy selection.
//!
//! Every response is handled by exactly one strategy. The conditions are
//! tested in a fixed priority order and the first match wins, which makes
//! the strategies mutually exclusive by construction.

use std::fmt;

use crate::http::headers::ContentEncoding;
use crate::policy::TransformFlags;

/// How a response body is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// URL is exempt: blind tunnel both ways.
    NoProcessing,
    /// URL is denied: 403.
    Deny,
    /// Body replaced by a fixed payload.
    ReplaceData,
    /// HEAD request: headers only.
    HeadOnly,
    /// HTTP/0.9 response relayed as is.
    SimpleResponse,
    /// Body encoded in a way we do not or may not decode.
    UndecodableEncoding,
    /// Gzip origin→client on the fly.
    StreamCompress,
    /// Gunzip origin→client on the fly.
    StreamDecompress,
    /// Too large or nothing to do: relayed as is.
    PassThroughTooLarge,
    /// Loaded into memory and transformed.
    BufferAndTransform,
}

impl Strategy {
    pub const ALL: [Strategy; 10] = [
        Strategy::NoProcessing,
        Strategy::Deny,
        Strategy::ReplaceData,
        Strategy::HeadOnly,
        Strategy::SimpleResponse,
        Strategy::UndecodableEncoding,
        Strategy::StreamCompress,
        Strategy::StreamDecompress,
        Strategy::PassThroughTooLarge,
        Strategy::BufferAndTransform,
    ];

    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::NoProcessing => "no_processing",
            Strategy::Deny => "deny",
            Strategy::ReplaceData => "replace_data",
            Strategy::HeadOnly => "head_only",
            Strategy::SimpleResponse => "simple_response",
            Strategy::UndecodableEncoding => "undecodable_encoding",
            Strategy::StreamCompress => "stream_compress",
            Strategy::StreamDecompress => "stream_decompress",
            Strategy::PassThroughTooLarge => "pass_through",
            Strategy::BufferAndTransform => "buffer_and_transform",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the selection depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyInputs {
    pub no_processing: bool,
    pub denied: bool,
    pub replaced: bool,
    pub is_head: bool,
    pub simple_response: bool,
    pub encoding: ContentEncoding,
    pub flags: TransformFlags,
    pub content_length: Option<u64>,
    /// 0 means unlimited.
    pub max_size: u64,
}

impl StrategyInputs {
    fn exceeds_max_size(&self) -> bool {
        self.max_size != 0 && matches!(self.content_length, Some(len) if len > self.max_size)
    }
}

/// Strategies decided from the request alone, before the origin is
/// contacted.
pub fn select_before_origin(no_processing: bool, denied: bool) -> Option<Strategy> {
    if no_processing {
        Some(Strategy::NoProcessing)
    } else if denied {
        Some(Strategy::Deny)
    } else {
        None
    }
}

/// Pick the strategy for a response.
pub fn select(inputs: &StrategyInputs) -> Strategy {
    if let Some(strategy) = select_before_origin(inputs.no_processing, inputs.denied) {
        return strategy;
    }
    if inputs.replaced {
        return Strategy::ReplaceData;
    }
    if inputs.is_head {
        return Strategy::HeadOnly;
    }
    if inputs.simple_response {
        return Strategy::SimpleResponse;
    }

    let flags = inputs.flags;
    let pre_decompress = flags.contains(TransformFlags::PRE_DECOMPRESS);
    let compress = flags.contains(TransformFlags::COMPRESS);

    if inputs.encoding.has_non_gzip() || (inputs.encoding.is_gzip_only() && !pre_decompress) {
        return Strategy::UndecodableEncoding;
    }

    // Work the body needs. When compress or decompress is the only work,
    // streaming is as good as buffering and needs no memory. Bodies of
    // unknown length stream too, rather than risk a plain overflow.
    let work = flags.masked(TransformFlags::MUST_READ);
    let too_large = inputs.exceeds_max_size();
    let must_stream = too_large || inputs.content_length.is_none();

    if !pre_decompress && compress && (must_stream || work == TransformFlags::COMPRESS) {
        return Strategy::StreamCompress;
    }
    if pre_decompress && !compress && (must_stream || work == TransformFlags::PRE_DECOMPRESS) {
        return Strategy::StreamDecompress;
    }

    let net_no_op = work
        .without(TransformFlags::COMPRESS | TransformFlags::PRE_DECOMPRESS)
        .is_empty();
    if too_large || net_no_op {
        return Strategy::PassThroughTooLarge;
    }

    Strategy::BufferAndTransform
}
