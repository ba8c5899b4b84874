//! Image recompression seam.

/// Result of asking the codec to recompress a picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// A new encoding, possibly in another format.
    Recompressed { content_type: String, data: Vec<u8> },
    /// Nothing better was produced.
    Unchanged,
    /// Decoding would exceed the configured memory ratio.
    TooExpensive,
}

/// Decoder/encoder for picture bodies.
///
/// Implementations must not panic on malformed input; anything they
/// cannot handle is `Unchanged`.
pub trait ImageCodec: Send + Sync {
    fn recompress(&self, content_type: &str, data: &[u8], accepts_jp2: bool) -> ImageOutcome;
}

/// Codec that never changes a picture.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughImageCodec;

impl ImageCodec for PassthroughImageCodec {
    fn recompress(&self, _content_type: &str, _data: &[u8], _accepts_jp2: bool) -> ImageOutcome {
        ImageOutcome::Unchanged
    }
}

/// Pick the outcome that should be sent: a recompressed body only wins
/// when it is strictly smaller than the original.
pub fn smaller_of(original_len: usize, outcome: ImageOutcome) -> ImageOutcome {
    match outcome {
        ImageOutcome::Recompressed { ref data, .. } if data.len() >= original_len => {
            ImageOutcome::Unchanged
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_candidates_are_discarded() {
        let bigger = ImageOutcome::Recompressed {
            content_type: "image/png".into(),
            data: vec![0; 10],
        };
        assert_eq!(smaller_of(10, bigger), ImageOutcome::Unchanged);

        let smaller = ImageOutcome::Recompressed {
            content_type: "image/jpeg".into(),
            data: vec![0; 3],
        };
        assert_eq!(smaller_of(10, smaller.clone()), smaller);
        assert_eq!(smaller_of(10, ImageOutcome::TooExpensive), ImageOutcome::TooExpensive);
    }

    #[test]
    fn passthrough_leaves_pictures_alone() {
        assert_eq!(
            PassthroughImageCodec.recompress("image/gif", b"GIF89a", false),
            ImageOutcome::Unchanged
        );
    }
}
