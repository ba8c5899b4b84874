//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, gzip level, addresses parse)
//! - Detect contradictory modes (no way to accept any request)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::http::request::split_host_port;

/// Status codes that may carry a custom error page.
pub const CUSTOM_ERROR_STATUSES: &[u16] = &[400, 403, 404, 407, 408, 409, 500, 503];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending key.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if !config.proxy.conventional_proxy && !config.proxy.transparent_proxy {
        errors.push(ValidationError::new(
            "proxy",
            "conventional_proxy and transparent_proxy are both disabled",
        ));
    }
    if let Some(next) = &config.proxy.next_proxy {
        if split_host_port(next, 8080).is_none() {
            errors.push(ValidationError::new(
                "proxy.next_proxy",
                format!("expected host[:port], got {:?}", next),
            ));
        }
    }

    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::new("timeouts.idle_secs", "must be > 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }

    if config.limits.gzip_level > 9 {
        errors.push(ValidationError::new("limits.gzip_level", "must be between 0 and 9"));
    }

    for key in config.error_pages.keys() {
        match key.parse::<u16>() {
            Ok(code) if CUSTOM_ERROR_STATUSES.contains(&code) => {}
            _ => errors.push(ValidationError::new(
                "error_pages",
                format!("unsupported status {:?}", key),
            )),
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", config.observability.metrics_address),
        ));
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"pretty\" or \"json\"",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.limits.gzip_level = 12;
        config.proxy.conventional_proxy = false;
        config.error_pages.insert("418".into(), "/tmp/teapot.html".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "proxy", "limits.gzip_level", "error_pages"]
        );
    }
}
