//! Transformation flags and content classes.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of transformations requested for one response body.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TransformFlags(u16);

impl TransformFlags {
    pub const NONE: Self = Self(0);
    pub const COMPRESS: Self = Self(1);
    pub const PRE_DECOMPRESS: Self = Self(1 << 1);
    pub const OPTIMIZE_HTML: Self = Self(1 << 2);
    pub const OPTIMIZE_CSS: Self = Self(1 << 3);
    pub const OPTIMIZE_JS: Self = Self(1 << 4);
    pub const PREEMPT_DNS: Self = Self(1 << 5);
    pub const RECOMPRESS_PICTURE: Self = Self(1 << 6);

    /// Flags that change the bytes of the body.
    pub const CONTENT_MODIFICATION: Self = Self(
        Self::COMPRESS.0
            | Self::PRE_DECOMPRESS.0
            | Self::OPTIMIZE_HTML.0
            | Self::OPTIMIZE_CSS.0
            | Self::OPTIMIZE_JS.0
            | Self::RECOMPRESS_PICTURE.0,
    );

    /// Flags that need the body to be read at all.
    pub const MUST_READ: Self = Self(Self::CONTENT_MODIFICATION.0 | Self::PREEMPT_DNS.0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Only the bits also in `mask`.
    pub fn masked(self, mask: Self) -> Self {
        Self(self.0 & mask.0)
    }

    /// Bits of `self` not in `other`.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for TransformFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TransformFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TransformFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(TransformFlags, &str)] = &[
            (TransformFlags::COMPRESS, "COMPRESS"),
            (TransformFlags::PRE_DECOMPRESS, "PRE_DECOMPRESS"),
            (TransformFlags::OPTIMIZE_HTML, "OPTIMIZE_HTML"),
            (TransformFlags::OPTIMIZE_CSS, "OPTIMIZE_CSS"),
            (TransformFlags::OPTIMIZE_JS, "OPTIMIZE_JS"),
            (TransformFlags::PREEMPT_DNS, "PREEMPT_DNS"),
            (TransformFlags::RECOMPRESS_PICTURE, "RECOMPRESS_PICTURE"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// What kind of content a response carries, judged from Content-Type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Html,
    Css,
    Jpeg,
    Png,
    Gif,
    Jp2k,
    JavaScript,
    Other,
}

impl ContentClass {
    /// Classify by case-insensitive Content-Type prefix.
    pub fn from_content_type(content_type: &str) -> Self {
        const PREFIXES: &[(&str, ContentClass)] = &[
            ("text/html", ContentClass::Html),
            ("text/css", ContentClass::Css),
            ("image/jpeg", ContentClass::Jpeg),
            ("image/pjpeg", ContentClass::Jpeg),
            ("image/jpg", ContentClass::Jpeg),
            ("image/pjpg", ContentClass::Jpeg),
            ("image/jp2", ContentClass::Jp2k),
            ("image/gif", ContentClass::Gif),
            ("image/png", ContentClass::Png),
            ("application/x-javascript", ContentClass::JavaScript),
            ("application/javascript", ContentClass::JavaScript),
            ("text/javascript", ContentClass::JavaScript),
        ];

        let ct = content_type.trim_start();
        PREFIXES
            .iter()
            .find(|(prefix, _)| {
                ct.get(..prefix.len())
                    .map(|head| head.eq_ignore_ascii_case(prefix))
                    .unwrap_or(false)
            })
            .map(|(_, class)| *class)
            .unwrap_or(ContentClass::Other)
    }

    pub fn is_image(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Gif | Self::Jp2k)
    }
}
