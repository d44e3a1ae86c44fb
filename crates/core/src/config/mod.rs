//! Gateway configuration with layered loading.
//!
//! This module provides configuration management using figment:
//!
//! 1. TOML config file (when the host passes one)
//! 2. Built-in defaults
//!
//! The defaults describe the ParkShare app shell: Django serves static files
//! under `/static/` and the REST API under `/api/`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::{PartitionName, PartitionRole};
use crate::request::resolve;

mod validation;

pub use validation::ConfigError;

/// What install does when some precache manifest entries cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecachePolicy {
    /// Every entry must fetch with 200, and all are written in one
    /// transaction. Any failure fails install; the previous version keeps
    /// serving.
    #[default]
    Strict,
    /// Write what could be fetched, log the rest, and finish install.
    BestEffort,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The gateway's own origin. Requests to any other origin pass through.
    #[serde(default = "default_origin")]
    pub origin: Url,

    /// Where network fetches are sent. Defaults to `origin`.
    #[serde(default)]
    pub upstream: Option<Url>,

    /// App-shell paths fetched and stored at install.
    #[serde(default = "default_precache_manifest")]
    pub precache_manifest: Vec<String>,

    /// The document served to navigations when nothing else can be.
    #[serde(default = "default_offline_document_url")]
    pub offline_document_url: String,

    #[serde(default = "default_static_path_prefix")]
    pub static_path_prefix: String,

    #[serde(default = "default_api_path_prefix")]
    pub api_path_prefix: String,

    /// Changing this is the only way to evict previously cached content.
    #[serde(default = "default_cache_version_tag")]
    pub cache_version_tag: String,

    #[serde(default)]
    pub precache_policy: PrecachePolicy,

    /// Path to the SQLite partition store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address the host binary listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// User-Agent string for upstream requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_origin() -> Url {
    Url::parse("http://localhost:8000").expect("default origin is a valid URL")
}

fn default_precache_manifest() -> Vec<String> {
    ["/", "/offline/", "/static/css/main.css", "/static/js/app.js", "/manifest.webmanifest"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_offline_document_url() -> String {
    "/offline/".into()
}

fn default_static_path_prefix() -> String {
    "/static/".into()
}

fn default_api_path_prefix() -> String {
    "/api/".into()
}

fn default_cache_version_tag() -> String {
    "v1".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./shellcache.sqlite")
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".into()
}

fn default_user_agent() -> String {
    "shellcache/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_max_redirects() -> usize {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            upstream: None,
            precache_manifest: default_precache_manifest(),
            offline_document_url: default_offline_document_url(),
            static_path_prefix: default_static_path_prefix(),
            api_path_prefix: default_api_path_prefix(),
            cache_version_tag: default_cache_version_tag(),
            precache_policy: PrecachePolicy::default(),
            db_path: default_db_path(),
            listen_addr: default_listen_addr(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl GatewayConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The upstream that network fetches go to.
    pub fn upstream(&self) -> &Url {
        self.upstream.as_ref().unwrap_or(&self.origin)
    }

    /// The current partition for `role`.
    pub fn partition(&self, role: PartitionRole) -> PartitionName {
        PartitionName::new(role, self.cache_version_tag.clone())
    }

    /// The offline document as an absolute URL on the gateway origin.
    pub fn offline_document(&self) -> Result<Url, ConfigError> {
        resolve(&self.origin, &self.offline_document_url).map_err(|e| ConfigError::Invalid {
            field: "offline_document_url".into(),
            reason: e.to_string(),
        })
    }

    /// The precache manifest as absolute URLs, in manifest order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache_manifest
            .iter()
            .map(|entry| {
                resolve(&self.origin, entry).map_err(|e| ConfigError::Invalid {
                    field: "precache_manifest".into(),
                    reason: format!("{entry}: {e}"),
                })
            })
            .collect()
    }

    /// Load configuration: built-in defaults, overridden by the TOML file at
    /// `path` if given.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if
    /// validation fails after loading.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::LoadFailed(format!("config file not found: {}", path.display())));
            }
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(figment)
    }

    /// Load configuration from a TOML string layered over the defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.origin.as_str(), "http://localhost:8000/");
        assert_eq!(config.offline_document_url, "/offline/");
        assert_eq!(config.static_path_prefix, "/static/");
        assert_eq!(config.api_path_prefix, "/api/");
        assert_eq!(config.cache_version_tag, "v1");
        assert_eq!(config.precache_policy, PrecachePolicy::Strict);
        assert_eq!(config.precache_manifest.len(), 5);
        assert!(config.upstream.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let config = GatewayConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_upstream_defaults_to_origin() {
        let mut config = GatewayConfig::default();
        assert_eq!(config.upstream(), &config.origin);

        config.upstream = Some(Url::parse("http://127.0.0.1:9000").unwrap());
        assert_eq!(config.upstream().port(), Some(9000));
    }

    #[test]
    fn test_partition_uses_version_tag() {
        let config = GatewayConfig { cache_version_tag: "v3".into(), ..Default::default() };
        assert_eq!(config.partition(PartitionRole::Static).to_string(), "static-v3");
        assert_eq!(config.partition(PartitionRole::Dynamic).to_string(), "dynamic-v3");
    }

    #[test]
    fn test_manifest_urls_resolve_against_origin() {
        let config = GatewayConfig::default();
        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "http://localhost:8000/");
        assert_eq!(urls[1].as_str(), "http://localhost:8000/offline/");
        assert_eq!(config.offline_document().unwrap(), urls[1]);
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
            origin = "https://parkshare.example"
            cache_version_tag = "v3"
            precache_policy = "best_effort"
            precache_manifest = ["/", "/offline/", "/static/app.css"]
            "#,
        )
        .unwrap();

        assert_eq!(config.origin.host_str(), Some("parkshare.example"));
        assert_eq!(config.cache_version_tag, "v3");
        assert_eq!(config.precache_policy, PrecachePolicy::BestEffort);
        assert_eq!(config.precache_manifest.len(), 3);
        assert_eq!(config.api_path_prefix, "/api/");
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let result = GatewayConfig::from_toml_str(r#"cache_version_tag = """#);
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_version_tag"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = GatewayConfig::load(Some(Path::new("/nonexistent/shellcache.toml")));
        assert!(matches!(result, Err(ConfigError::LoadFailed(_))));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = GatewayConfig::load(None).unwrap();
        assert_eq!(config.cache_version_tag, "v1");
    }
}
