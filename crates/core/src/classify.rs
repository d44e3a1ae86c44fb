//! Request classification.
//!
//! Maps every request the host offers to either a bypass decision or one
//! of the closed set of request classes. Pure and deterministic.

use serde::Serialize;
use url::Url;

use crate::request::{GatewayRequest, RequestMode};

/// The class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestClass {
    /// A page navigation or a request that prefers an HTML document.
    NavigationHtml,
    /// Anything under the static path prefix.
    StaticAsset,
    /// Anything under the API path prefix.
    Api,
    /// Same-origin GET that matched nothing else.
    Other,
}

/// Why a request is not intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BypassReason {
    NonGetMethod,
    CrossOrigin,
    /// The worker has not activated yet, so it controls no pages.
    NotControlling,
}

/// Classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Bypass(BypassReason),
    Intercept(RequestClass),
}

/// Classifies requests against the gateway origin and path prefixes.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Url,
    static_prefix: String,
    api_prefix: String,
}

impl Classifier {
    pub fn new(origin: Url, static_prefix: impl Into<String>, api_prefix: impl Into<String>) -> Self {
        Self { origin, static_prefix: static_prefix.into(), api_prefix: api_prefix.into() }
    }

    /// Classify a request. Rules apply in priority order.
    pub fn classify(&self, request: &GatewayRequest) -> Disposition {
        if request.method != http::Method::GET {
            return Disposition::Bypass(BypassReason::NonGetMethod);
        }

        if !request.is_same_origin(&self.origin) {
            return Disposition::Bypass(BypassReason::CrossOrigin);
        }

        let prefers_html = request.accept().is_some_and(|accept| accept.contains("text/html"));
        if request.mode == RequestMode::Navigate || prefers_html {
            return Disposition::Intercept(RequestClass::NavigationHtml);
        }

        let path = request.url.path();
        if path.starts_with(&self.static_prefix) {
            Disposition::Intercept(RequestClass::StaticAsset)
        } else if path.starts_with(&self.api_prefix) {
            Disposition::Intercept(RequestClass::Api)
        } else {
            Disposition::Intercept(RequestClass::Other)
        }
    }
}
