//! Configuration validation rules.
//!
//! This module provides validation logic for `GatewayConfig` values
//! after they have been loaded from a file or defaults.

use crate::config::GatewayConfig;
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

fn check_http_url(field: &str, url: &Url) -> Result<(), ConfigError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(field, format!("unsupported scheme: {}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid(field, "must have a host"));
    }
    Ok(())
}

fn check_prefix(field: &str, prefix: &str) -> Result<(), ConfigError> {
    if !prefix.starts_with('/') || !prefix.ends_with('/') || prefix.len() < 2 {
        return Err(invalid(field, "must start and end with '/' and name a directory"));
    }
    Ok(())
}

impl GatewayConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` or `upstream` is not an http(s) URL with a host
    /// - `cache_version_tag` is empty or contains whitespace or `/`
    /// - a path prefix does not start and end with `/`
    /// - `precache_manifest` is empty or does not list the offline document
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    ///
    /// Returns `ConfigError::Missing` if `offline_document_url` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_http_url("origin", &self.origin)?;
        if let Some(upstream) = &self.upstream {
            check_http_url("upstream", upstream)?;
        }

        let tag = &self.cache_version_tag;
        if tag.is_empty() {
            return Err(invalid("cache_version_tag", "must not be empty"));
        }
        if tag.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(invalid("cache_version_tag", "must not contain whitespace or '/'"));
        }

        check_prefix("static_path_prefix", &self.static_path_prefix)?;
        check_prefix("api_path_prefix", &self.api_path_prefix)?;
        if self.static_path_prefix == self.api_path_prefix {
            return Err(invalid("api_path_prefix", "must differ from static_path_prefix"));
        }

        if self.offline_document_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "offline_document_url".into(),
                hint: "set the path of the offline page, e.g. \"/offline/\"".into(),
            });
        }
        if self.precache_manifest.is_empty() {
            return Err(invalid("precache_manifest", "must not be empty"));
        }

        let offline = self.offline_document()?;
        let manifest = self.manifest_urls()?;
        if !manifest.contains(&offline) {
            return Err(invalid("precache_manifest", format!("must include the offline document {offline}")));
        }

        if let Some(foreign) = manifest.iter().find(|url| url.origin() != self.origin.origin()) {
            tracing::warn!(url = %foreign, "precache manifest lists a cross-origin URL; it will never be served from cache");
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        Ok(())
    }
}
