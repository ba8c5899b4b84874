//! Preemptive name resolution for hostnames linked from HTML.
//!
//! The browser will look these names up once it parses the page; resolving
//! them first warms the resolver cache on the proxy side of the slow link.

use std::collections::HashSet;
use std::io;

use tokio::task::JoinSet;

/// Bytes that end a hostname after `://`.
const HOST_DELIMITERS: &[u8] = b":?;\\/'\">\n\r)&";

/// Extract up to `max` distinct hostnames that follow `://` in `html`.
///
/// Userinfo (`user@`) is skipped. Literal IPv4 addresses and names of two
/// characters or fewer are ignored.
pub fn collect_hostnames(html: &[u8], max: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut pos = 0;

    while names.len() < max {
        let Some(found) = html[pos..].windows(3).position(|w| w == b"://") else {
            break;
        };
        let mut start = pos + found + 3;
        let mut end = start;
        while end < html.len() && !HOST_DELIMITERS.contains(&html[end]) {
            if html[end] == b'@' {
                start = end + 1;
            }
            end += 1;
        }
        pos = end;

        let Ok(name) = std::str::from_utf8(&html[start..end]) else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.len() <= 2 || name.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            continue;
        }
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }

    names
}

/// Resolve `hostnames` in a detached task. Nothing waits for the result.
pub fn spawn_preemptive_resolution(hostnames: Vec<String>) {
    if hostnames.is_empty() {
        return;
    }
    tracing::debug!(count = hostnames.len(), "Preemptive DNS resolution started");
    tokio::spawn(async move {
        for (host, resolved) in resolve_all(hostnames).await {
            match resolved {
                Ok(count) => tracing::trace!(%host, count, "Preemptively resolved"),
                Err(e) => tracing::trace!(%host, error = %e, "Preemptive lookup failed"),
            }
        }
    });
}

/// Look every name up concurrently, returning the address count per name.
async fn resolve_all(hostnames: Vec<String>) -> Vec<(String, io::Result<usize>)> {
    let mut lookups = JoinSet::new();
    for host in hostnames {
        lookups.spawn(async move {
            let count = tokio::net::lookup_host(format!("{}:80", host))
                .await
                .map(|addrs| addrs.count());
            (host, count)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = lookups.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::debug!(error = %e, "Preemptive lookup task failed"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_distinct_hostnames() {
        let html = br#"<a href="http://Example.com/x">a</a>
<img src="http://cdn.example.net:8080/i.png">
<a href='https://user@login.example.org/'>b</a>
<a href="http://example.com/again">c</a>
<a href="http://10.0.0.1/">ip</a>
<a href="http://ab/">short</a>"#;
        assert_eq!(
            collect_hostnames(html, 50),
            vec!["example.com", "cdn.example.net", "login.example.org"]
        );
    }

    #[test]
    fn respects_max() {
        let html = b"http://a.example/ http://b.example/ http://c.example/";
        assert_eq!(collect_hostnames(html, 2), vec!["a.example", "b.example"]);
        assert!(collect_hostnames(html, 0).is_empty());
    }

    #[tokio::test]
    async fn resolves_each_name_once() {
        let results = resolve_all(vec!["localhost".to_string()]).await;
        assert_eq!(results.len(), 1);
        let (host, count) = &results[0];
        assert_eq!(host, "localhost");
        assert!(*count.as_ref().unwrap() >= 1);
    }

    #[tokio::test]
    async fn spawning_does_not_wait() {
        let started = std::time::Instant::now();
        spawn_preemptive_resolution(vec!["localhost".to_string()]);
        spawn_preemptive_resolution(Vec::new());
        assert!(started.elapsed() < std::time::Duration::from_millis(50));
    }
}
