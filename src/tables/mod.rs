//! Lookup tables consulted per request.
//!
//! # Data Flow
//! ```text
//! TablesConfig (file paths + inline lists)
//!     → Tables::from_config (read files once at startup)
//!     → shared read-only via Arc
//!     → TransferPipeline asks: no-processing? deny? replace?
//!     → ContentPolicy asks: lossless-compressible content type?
//! ```
//!
//! # Design Decisions
//! - Tables are immutable after startup; no locking
//! - A missing table file is a startup error, never a silent empty table

pub mod matcher;

use std::path::Path;

pub use matcher::{ContentTypeTable, Matcher, Pattern, UrlTable};

use crate::config::{ConfigError, ProxyConfig};

/// Every table the proxy consults.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub no_processing: Option<UrlTable>,
    pub deny: Option<UrlTable>,
    pub replace_data: Option<UrlTable>,
    pub replace_data_ct: Option<UrlTable>,
    pub replace_data_ct_list: ContentTypeTable,
    pub lossless_compress: ContentTypeTable,
}

impl Tables {
    /// Load every configured table.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let t = &config.tables;
        Ok(Self {
            no_processing: load_optional(t.no_processing.as_deref())?,
            deny: load_optional(t.deny.as_deref())?,
            replace_data: load_optional(t.replace_data.as_deref())?,
            replace_data_ct: load_optional(t.replace_data_ct.as_deref())?,
            replace_data_ct_list: ContentTypeTable::from_entries(
                &t.replace_data_ct_list,
                t.replace_data_ct_also_xst,
            ),
            lossless_compress: ContentTypeTable::from_entries(
                &config.transform.lossless_compress_ct,
                config.transform.lossless_compress_ct_also_xst,
            ),
        })
    }

    pub fn is_no_processing(&self, host: &str, path: &str) -> bool {
        check(&self.no_processing, host, path)
    }

    pub fn is_denied(&self, host: &str, path: &str) -> bool {
        check(&self.deny, host, path)
    }

    /// URL-only or URL + content-type replacement.
    pub fn is_replaced(&self, host: &str, path: &str, content_type: Option<&str>) -> bool {
        if check(&self.replace_data, host, path) {
            return true;
        }
        match content_type {
            Some(ct) => {
                check(&self.replace_data_ct, host, path)
                    && self.replace_data_ct_list.matches_content_type(ct)
            }
            None => false,
        }
    }
}

fn check(table: &Option<UrlTable>, host: &str, path: &str) -> bool {
    table.as_ref().map(|t| t.matches(host, path)).unwrap_or(false)
}

fn load_optional(path: Option<&Path>) -> Result<Option<UrlTable>, ConfigError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Table {
        path: path.to_path_buf(),
        source,
    })?;
    let table = UrlTable::parse(&text);
    tracing::info!(path = %path.display(), entries = table.len(), "URL table loaded");
    Ok(Some(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_by_content_type_needs_both() {
        let tables = Tables {
            replace_data_ct: Some(UrlTable::parse("http://cdn.example/*\n")),
            replace_data_ct_list: ContentTypeTable::from_entries(["image/gif"], true),
            ..Default::default()
        };
        assert!(tables.is_replaced("cdn.example", "/a.gif", Some("image/gif")));
        assert!(!tables.is_replaced("cdn.example", "/a.png", Some("image/png")));
        assert!(!tables.is_replaced("cdn.example", "/a.gif", None));
        assert!(!tables.is_replaced("other.example", "/a.gif", Some("image/gif")));
    }

    #[test]
    fn missing_table_file_is_an_error() {
        let mut config = ProxyConfig::default();
        config.tables.deny = Some("/nonexistent/ziproxy/deny.txt".into());
        assert!(matches!(
            Tables::from_config(&config),
            Err(ConfigError::Table { .. })
        ));
    }
}
