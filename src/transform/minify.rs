//! Text minification for HTML, CSS and JavaScript bodies.
//!
//! # Responsibilities
//! - Define the `Minifier` seam the pipeline calls into
//! - Provide a conservative whitespace/comment minifier
//!
//! # Design Decisions
//! - Work on bytes, only ASCII whitespace and comment markers are touched,
//!   so any charset survives
//! - Output is never longer than input; if it would be, the input is
//!   returned unchanged
//! - JavaScript is only trimmed per line; statements keep their newlines

use crate::config::TransformConfig;

/// Which parts of an HTML document may be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlOptions {
    /// Collapse whitespace in text between tags.
    pub text: bool,
    /// Collapse whitespace inside tags.
    pub tags: bool,
    /// Minify `<style>` blocks.
    pub css: bool,
    /// Minify `<script>` blocks.
    pub javascript: bool,
    /// Drop comments (conditional comments are kept).
    pub no_comments: bool,
    /// Also collapse `<pre>` content.
    pub pre: bool,
    /// Also collapse `<textarea>` content.
    pub textarea: bool,
}

impl HtmlOptions {
    pub fn from_config(config: &TransformConfig) -> Self {
        Self {
            text: config.html_text,
            tags: config.html_tags,
            css: config.html_css,
            javascript: config.html_js,
            no_comments: config.html_no_comments,
            pre: config.html_pre,
            textarea: config.html_textarea,
        }
    }

    pub fn all() -> Self {
        Self {
            text: true,
            tags: true,
            css: true,
            javascript: true,
            no_comments: true,
            pre: true,
            textarea: true,
        }
    }
}

/// Body minifier used by the buffered transform path.
pub trait Minifier: Send + Sync {
    fn minify_html(&self, input: &[u8], options: HtmlOptions) -> Vec<u8>;
    fn minify_css(&self, input: &[u8]) -> Vec<u8>;
    fn minify_js(&self, input: &[u8]) -> Vec<u8>;
}

/// Minifier that removes comments and redundant whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceMinifier;

impl Minifier for WhitespaceMinifier {
    fn minify_html(&self, input: &[u8], options: HtmlOptions) -> Vec<u8> {
        never_grow(input, pack_html(self, input, options))
    }

    fn minify_css(&self, input: &[u8]) -> Vec<u8> {
        never_grow(input, pack_css(input))
    }

    fn minify_js(&self, input: &[u8]) -> Vec<u8> {
        never_grow(input, pack_js(input))
    }
}

fn never_grow(input: &[u8], output: Vec<u8>) -> Vec<u8> {
    if output.len() > input.len() {
        input.to_vec()
    } else {
        output
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Append `text` with every whitespace run reduced to one byte: a newline
/// when the run contained one, a space otherwise.
fn push_collapsed(out: &mut Vec<u8>, text: &[u8]) {
    let mut run: Option<u8> = None;
    for &b in text {
        if b.is_ascii_whitespace() {
            run = Some(match run {
                Some(b'\n') => b'\n',
                _ if b == b'\n' => b'\n',
                _ => b' ',
            });
            continue;
        }
        if let Some(ws) = run.take() {
            out.push(ws);
        }
        out.push(b);
    }
    if let Some(ws) = run {
        out.push(ws);
    }
}

/// Elements whose content is not ordinary markup.
const RAW_ELEMENTS: &[&[u8]] = &[b"script", b"style", b"pre", b"textarea"];

fn pack_html<M: Minifier + ?Sized>(minifier: &M, input: &[u8], options: HtmlOptions) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let rest = &input[i..];

        if rest.starts_with(b"<!--") {
            let end = find(&rest[4..], b"-->").map(|p| p + 7).unwrap_or(rest.len());
            let conditional = rest[4..].starts_with(b"[if") || rest[4..].starts_with(b"<![");
            if !options.no_comments || conditional {
                out.extend_from_slice(&rest[..end]);
            }
            i += end;
            continue;
        }

        if rest[0] == b'<' {
            let tag_len = tag_length(rest);
            let tag = &rest[..tag_len];
            if options.tags {
                push_tag_compacted(&mut out, tag);
            } else {
                out.extend_from_slice(tag);
            }
            i += tag_len;

            if let Some(name) = raw_element(tag) {
                let content_len = closing_tag_position(&input[i..], name);
                let content = &input[i..i + content_len];
                match name {
                    b"script" if options.javascript => out.extend(minifier.minify_js(content)),
                    b"style" if options.css => out.extend(minifier.minify_css(content)),
                    b"pre" if options.pre && options.text => push_collapsed(&mut out, content),
                    b"textarea" if options.textarea && options.text => {
                        push_collapsed(&mut out, content)
                    }
                    _ => out.extend_from_slice(content),
                }
                i += content_len;
            }
            continue;
        }

        let text_len = rest.iter().position(|&b| b == b'<').unwrap_or(rest.len());
        if options.text {
            push_collapsed(&mut out, &rest[..text_len]);
        } else {
            out.extend_from_slice(&rest[..text_len]);
        }
        i += text_len;
    }

    out
}

/// Length of the tag starting at `input[0] == '<'`, up to and including
/// `>`. Quoted attribute values may contain `>`.
fn tag_length(input: &[u8]) -> usize {
    let mut quote: Option<u8> = None;
    for (idx, &b) in input.iter().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return idx + 1,
            None => {}
        }
    }
    input.len()
}

fn raw_element(tag: &[u8]) -> Option<&'static [u8]> {
    let name_len = tag[1..]
        .iter()
        .position(|b| !b.is_ascii_alphanumeric())
        .unwrap_or(tag.len() - 1);
    let name = &tag[1..1 + name_len];
    if tag.ends_with(b"/>") {
        return None;
    }
    RAW_ELEMENTS
        .iter()
        .copied()
        .find(|raw| raw.eq_ignore_ascii_case(name))
}

fn closing_tag_position(input: &[u8], name: &[u8]) -> usize {
    let mut needle = Vec::with_capacity(name.len() + 2);
    needle.extend_from_slice(b"</");
    needle.extend_from_slice(name);
    find_ignore_case(input, &needle).unwrap_or(input.len())
}

/// Collapse whitespace inside a tag, leaving quoted values alone.
fn push_tag_compacted(out: &mut Vec<u8>, tag: &[u8]) {
    let mut quote: Option<u8> = None;
    let mut pending_space = false;
    for &b in tag {
        if let Some(q) = quote {
            out.push(b);
            if b == q {
                quote = None;
            }
            continue;
        }
        if b.is_ascii_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && b != b'>' && !(b == b'/' && tag.ends_with(b"/>")) {
            out.push(b' ');
        }
        pending_space = false;
        if b == b'"' || b == b'\'' {
            quote = Some(b);
        }
        out.push(b);
    }
}

fn pack_css(input: &[u8]) -> Vec<u8> {
    const TIGHT: &[u8] = b"{};,>";
    let mut out: Vec<u8> = Vec::with_capacity(input.len());
    let mut i = 0;
    let mut pending_space = false;

    while i < input.len() {
        let b = input[i];

        if input[i..].starts_with(b"/*") {
            i += find(&input[i + 2..], b"*/").map(|p| p + 4).unwrap_or(input.len() - i);
            continue;
        }

        if b == b'"' || b == b'\'' {
            let end = input[i + 1..]
                .iter()
                .position(|&c| c == b)
                .map(|p| i + p + 2)
                .unwrap_or(input.len());
            if pending_space && !out.is_empty() {
                out.push(b' ');
            }
            pending_space = false;
            out.extend_from_slice(&input[i..end]);
            i = end;
            continue;
        }

        if b.is_ascii_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }

        if pending_space {
            let prev_tight = out.last().map(|p| TIGHT.contains(p)).unwrap_or(true);
            if !prev_tight && !TIGHT.contains(&b) {
                out.push(b' ');
            }
            pending_space = false;
        }
        out.push(b);
        i += 1;
    }

    out
}

fn pack_js(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for line in input.split(|&b| b == b'\n') {
        let start = line.iter().position(|b| !b.is_ascii_whitespace());
        let end = line.iter().rposition(|b| !b.is_ascii_whitespace());
        if let (Some(start), Some(end)) = (start, end) {
            out.extend_from_slice(&line[start..=end]);
            out.push(b'\n');
        }
    }
    if !input.ends_with(b"\n") && out.last() == Some(&b'\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(input: &str) -> String {
        let out = WhitespaceMinifier.minify_html(input.as_bytes(), HtmlOptions::all());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn collapses_text_and_tags() {
        assert_eq!(
            html("<p   class=\"a  b\" >  hello \n\n  world  </p>"),
            "<p class=\"a  b\"> hello\nworld </p>"
        );
        assert_eq!(html("<br   />"), "<br/>");
    }

    #[test]
    fn drops_comments_but_keeps_conditionals() {
        assert_eq!(html("a<!-- note -->b"), "ab");
        assert_eq!(html("<!--[if IE]>x<![endif]-->"), "<!--[if IE]>x<![endif]-->");

        let mut keep = HtmlOptions::all();
        keep.no_comments = false;
        let out = WhitespaceMinifier.minify_html(b"a<!-- note -->b", keep);
        assert_eq!(out, b"a<!-- note -->b");
    }

    #[test]
    fn raw_blocks_follow_their_options() {
        let mut options = HtmlOptions::all();
        options.pre = false;
        let input = b"<pre>  keep\n   this </pre>   <b>x</b>";
        let out = WhitespaceMinifier.minify_html(input, options);
        assert_eq!(out, b"<pre>  keep\n   this </pre> <b>x</b>".to_vec());
    }

    #[test]
    fn script_and_style_use_their_minifiers() {
        let out = html("<style> a { color : red ; } </style><script>\n   var a = 1;\n\n   go();\n</script>");
        assert_eq!(
            out,
            "<style>a{color : red;}</style><script>var a = 1;\ngo();\n</script>"
        );
    }

    #[test]
    fn css_keeps_strings_and_drops_comments() {
        let out = WhitespaceMinifier.minify_css(b"/* c */ a  b { content: \"  x  \" ; }");
        assert_eq!(out, b"a b{content: \"  x  \";}".to_vec());
    }

    #[test]
    fn never_grows() {
        let input = b"<a>b</a>";
        assert_eq!(WhitespaceMinifier.minify_html(input, HtmlOptions::all()), input.to_vec());
        assert!(WhitespaceMinifier.minify_js(b"").is_empty());
    }
}
