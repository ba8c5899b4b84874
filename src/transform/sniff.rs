//! Content sniffing for bodies labelled `text/html`.
//!
//! Servers label all sorts of things as HTML. A body is only treated as
//! HTML when an `<html>`, `<head>`, `<body>` or `<!doctype html` tag shows
//! up outside quotes, brackets and script-style comments, which rules out
//! JavaScript and CSS that merely mention tags in strings.

const MARKER_TAGS: &[&[u8]] = &[b"html", b"head", b"body", b"!doctype html"];

/// True when `body` is recognisably an HTML document.
pub fn looks_like_html(body: &[u8]) -> bool {
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            b'<' => {
                if is_marker_tag(&body[i + 1..]) {
                    return true;
                }
                i += skip_past(&body[i + 1..], b'>') + 1;
            }
            quote @ (b'\'' | b'"') => i += skip_past(&body[i + 1..], quote) + 1,
            b'(' => i += skip_past(&body[i + 1..], b')') + 1,
            b'[' => i += skip_past(&body[i + 1..], b']') + 1,
            b'{' => i += skip_past(&body[i + 1..], b'}') + 1,
            b'/' if body.get(i + 1) == Some(&b'/') => {
                i += body[i..]
                    .iter()
                    .position(|&b| b == b'\n' || b == b'\r')
                    .unwrap_or(body.len() - i);
            }
            b'/' if body.get(i + 1) == Some(&b'*') => {
                i += body[i + 2..]
                    .windows(2)
                    .position(|w| w == b"*/")
                    .map(|p| p + 4)
                    .unwrap_or(body.len() - i);
            }
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    false
}

fn is_marker_tag(after_lt: &[u8]) -> bool {
    MARKER_TAGS.iter().any(|tag| {
        after_lt.len() > tag.len()
            && after_lt[..tag.len()].eq_ignore_ascii_case(tag)
            && matches!(after_lt[tag.len()], b' ' | b'>' | b'/' | b'\n' | b'\r' | b'\t')
    })
}

/// Bytes up to and including `stop`, or all of `input`.
fn skip_past(input: &[u8], stop: u8) -> usize {
    input
        .iter()
        .position(|&b| b == stop)
        .map(|p| p + 1)
        .unwrap_or(input.len())
}
