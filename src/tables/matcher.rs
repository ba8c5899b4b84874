//! Wildcard matching for URL and content-type tables.
//!
//! # Responsibilities
//! - Match `*` wildcards against hosts, URLs and content types
//! - Build URL tables from `http://host/path` entries
//! - Build content-type tables with the `type`, `type/*` and `x-` aliases
//!
//! # Design Decisions
//! - `*` matches any run of bytes, including an empty one
//! - Hosts and content types compare case-insensitively, paths do not
//! - No regex to guarantee linear-ish matching on short patterns

/// Anything that can be asked whether a request URL belongs to it.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if `host` + `path` is covered by this matcher.
    fn matches(&self, host: &str, path: &str) -> bool;
}

/// A single wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(String);

impl Pattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Glob match over bytes with `*` as the only metacharacter.
    pub fn matches(&self, text: &str) -> bool {
        let pat = self.0.as_bytes();
        let txt = text.as_bytes();
        let (mut p, mut t) = (0, 0);
        let mut star: Option<(usize, usize)> = None;

        while t < txt.len() {
            if p < pat.len() && pat[p] == b'*' {
                star = Some((p, t));
                p += 1;
            } else if p < pat.len() && pat[p] == txt[t] {
                p += 1;
                t += 1;
            } else if let Some((sp, st)) = star {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            } else {
                return false;
            }
        }
        pat[p..].iter().all(|&b| b == b'*')
    }
}

/// Build the `host/path` key used by URL tables.
pub fn url_key(host: &str, path: &str) -> String {
    format!("{}/{}", host, path.strip_prefix('/').unwrap_or(path))
}

#[derive(Debug, Clone)]
struct UrlEntry {
    host: Pattern,
    url: Pattern,
}

/// Set of URL patterns, each split into a host pattern and a full pattern.
#[derive(Debug, Clone, Default)]
pub struct UrlTable {
    entries: Vec<UrlEntry>,
}

impl UrlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse table text: one `http://host/path` per line, `#` comments.
    ///
    /// Lines that are not `http://` URLs are skipped.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if let Some(rest) = line.strip_prefix("http://") {
                let (host, path) = match rest.find('/') {
                    Some(idx) => rest.split_at(idx),
                    None => (rest, "/"),
                };
                table.insert(host, path);
            }
        }
        table
    }

    /// Add an entry. An empty path means the root.
    pub fn insert(&mut self, host: &str, path: &str) {
        let host = host.to_ascii_lowercase();
        let path = if path.is_empty() { "/" } else { path };
        self.entries.push(UrlEntry {
            url: Pattern::new(url_key(&host, path)),
            host: Pattern::new(host),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Matcher for UrlTable {
    fn matches(&self, host: &str, path: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let key = url_key(&host, path);
        self.entries
            .iter()
            .any(|e| e.host.matches(&host) && e.url.matches(&key))
    }
}

/// Set of content-type patterns.
#[derive(Debug, Clone, Default)]
pub struct ContentTypeTable {
    patterns: Vec<Pattern>,
    add_x_prefix: bool,
}

impl ContentTypeTable {
    /// Empty table. With `add_x_prefix`, `type/sub` also covers `type/x-sub`.
    pub fn new(add_x_prefix: bool) -> Self {
        Self {
            patterns: Vec::new(),
            add_x_prefix,
        }
    }

    pub fn from_entries<I, S>(entries: I, add_x_prefix: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new(add_x_prefix);
        for entry in entries {
            table.insert(entry.as_ref());
        }
        table
    }

    pub fn insert(&mut self, content_type: &str) {
        let ct = content_type.trim().to_ascii_lowercase();
        if ct.is_empty() {
            return;
        }
        let (major, sub) = match ct.split_once('/') {
            Some((major, sub)) => (major.to_string(), sub.to_string()),
            None => (ct.clone(), String::new()),
        };

        if sub.is_empty() {
            self.push(major.clone());
            self.push(format!("{}/*", major));
            return;
        }

        self.push(format!("{}/{}", major, sub));
        if sub == "*" {
            self.push(major.clone());
        }
        if self.add_x_prefix && !sub.starts_with("x-") {
            self.push(format!("{}/x-{}", major, sub));
        }
    }

    fn push(&mut self, pattern: String) {
        let pattern = Pattern::new(pattern);
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Case-insensitive membership test for a content type (no parameters).
    pub fn matches_content_type(&self, content_type: &str) -> bool {
        let ct = content_type.trim().to_ascii_lowercase();
        self.patterns.iter().any(|p| p.matches(&ct))
    }
}
