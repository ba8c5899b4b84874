//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Request admission and upstream rewriting.
    pub proxy: ProxySettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Size and ratio budgets.
    pub limits: LimitsConfig,

    /// Content transformation toggles.
    pub transform: TransformConfig,

    /// URL and content-type tables.
    pub tables: TablesConfig,

    /// Custom error page bodies keyed by status code ("404" = "/path").
    pub error_pages: BTreeMap<String, PathBuf>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
        }
    }
}

/// Request admission and upstream rewriting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Accept absolute-form (`GET http://...`) and CONNECT requests.
    pub conventional_proxy: bool,

    /// Accept origin-form requests, resolving the origin from `Host:`.
    pub transparent_proxy: bool,

    /// Allow the CONNECT method.
    pub allow_connect: bool,

    /// Ports CONNECT may reach. Empty means any port.
    pub restrict_connect_ports: Vec<u16>,

    /// Ports plain HTTP requests may reach. Empty means any port.
    pub restrict_http_ports: Vec<u16>,

    /// Name announced in `Via`; also enables loop detection.
    pub server_host: Option<String>,

    /// Parent proxy ("host:port") all HTTP requests are sent through.
    pub next_proxy: Option<String>,

    /// Replace the client's Accept-Encoding with `gzip` upstream.
    pub override_accept_encoding: bool,

    /// Replace the client's User-Agent upstream.
    pub redefine_user_agent: Option<String>,

    /// Send `X-Ziproxy-Flags: jp2` upstream.
    pub announce_jp2: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            conventional_proxy: true,
            transparent_proxy: false,
            allow_connect: true,
            restrict_connect_ports: Vec::new(),
            restrict_http_ports: Vec::new(),
            server_host: None,
            next_proxy: None,
            override_accept_encoding: true,
            redefine_user_agent: None,
            announce_jp2: false,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Longest a single I/O step may stall, in seconds. Re-armed on progress.
    pub idle_secs: u64,

    /// How long in-flight sessions may run after shutdown starts.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            idle_secs: 90,
            shutdown_grace_secs: 5,
        }
    }
}

/// Size and ratio budgets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest body loaded into memory for transformation. 0 = unlimited.
    pub max_size: u64,

    /// Decompressed/compressed ceiling in percent. 0 = unlimited.
    pub max_uncompressed_gzip_ratio: u64,

    /// Output bytes produced before the ratio is enforced on streams.
    pub min_uncompressed_gzip_stream_eval: u64,

    /// Decoded/encoded ceiling in percent handed to the image codec.
    pub max_uncompressed_image_ratio: u64,

    /// Deflate level for gzip output (0-9).
    pub gzip_level: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_size: 1_048_576,
            max_uncompressed_gzip_ratio: 2000,
            min_uncompressed_gzip_stream_eval: 10_000_000,
            max_uncompressed_image_ratio: 500,
            gzip_level: 9,
        }
    }
}

/// Content transformation toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Gzip compressible content for clients that accept it.
    pub gzip: bool,

    /// Decode gzip bodies from the origin so they can be transformed.
    pub decompress_incoming_gzip: bool,

    pub process_jpg: bool,
    pub process_png: bool,
    pub process_gif: bool,
    pub process_jp2: bool,

    pub process_html: bool,
    pub process_css: bool,
    pub process_js: bool,

    /// HTML minifier: minify embedded CSS.
    pub html_css: bool,
    /// HTML minifier: minify embedded scripts.
    pub html_js: bool,
    /// HTML minifier: compact tags.
    pub html_tags: bool,
    /// HTML minifier: compact text.
    pub html_text: bool,
    /// HTML minifier: also touch `<pre>` blocks.
    pub html_pre: bool,
    /// HTML minifier: also touch `<textarea>` blocks.
    pub html_textarea: bool,
    /// HTML minifier: drop comments.
    pub html_no_comments: bool,

    /// Resolve hostnames found in HTML ahead of the client.
    pub preempt_dns: bool,

    /// Most hostnames resolved per document.
    pub preempt_dns_max: usize,

    /// Never modify 4xx/5xx bodies sent to MSIE.
    pub msie_friendly_errors_workaround: bool,

    /// Content types eligible for gzip.
    pub lossless_compress_ct: Vec<String>,

    /// Entries of `lossless_compress_ct` also match `x-` subtypes.
    pub lossless_compress_ct_also_xst: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            gzip: true,
            decompress_incoming_gzip: true,
            process_jpg: true,
            process_png: true,
            process_gif: true,
            process_jp2: false,
            process_html: false,
            process_css: false,
            process_js: false,
            html_css: true,
            html_js: true,
            html_tags: true,
            html_text: true,
            html_pre: true,
            html_textarea: true,
            html_no_comments: true,
            preempt_dns: false,
            preempt_dns_max: 50,
            msie_friendly_errors_workaround: true,
            lossless_compress_ct: default_lossless_compress_ct(),
            lossless_compress_ct_also_xst: true,
        }
    }
}

fn default_lossless_compress_ct() -> Vec<String> {
    [
        "text/*",
        "application/shockwave",
        "application/msword",
        "application/msexcel",
        "application/mspowerpoint",
        "application/rtf",
        "application/postscript",
        "application/java",
        "application/javascript",
        "application/staroffice",
        "application/vnd.*",
        "application/futuresplash",
        "application/asp",
        "application/class",
        "application/font",
        "application/truetype-font",
        "application/php",
        "application/cgi",
        "application/executable",
        "application/shellscript",
        "application/perl",
        "application/python",
        "application/awk",
        "application/dvi",
        "application/css",
        "application/*+xml",
        "application/xml",
        "application/pdf",
        "application/tar",
        "application/json",
        "application/xml-dtd",
        "application/iso9660-image",
        "image/svg+xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// URL and content-type tables. File tables hold one pattern per line.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TablesConfig {
    /// URLs relayed untouched (blind tunnel).
    pub no_processing: Option<PathBuf>,

    /// URLs answered with 403.
    pub deny: Option<PathBuf>,

    /// URLs whose body is replaced by a transparent GIF.
    pub replace_data: Option<PathBuf>,

    /// URLs whose body is replaced when the content type also matches.
    pub replace_data_ct: Option<PathBuf>,

    /// Content types for `replace_data_ct`.
    pub replace_data_ct_list: Vec<String>,

    /// Entries of `replace_data_ct_list` also match `x-` subtypes.
    pub replace_data_ct_also_xst: bool,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            no_processing: None,
            deny: None,
            replace_data: None,
            replace_data_ct: None,
            replace_data_ct_list: Vec::new(),
            replace_data_ct_also_xst: true,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is unset.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Access log file. Records go to the `access_log` target when unset.
    pub access_log: Option<PathBuf>,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Address the exporter listens on.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            access_log: None,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
