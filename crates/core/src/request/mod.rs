//! The request model offered to the gateway by its host.
//!
//! A `GatewayRequest` carries only what classification and caching need:
//! method, normalized absolute URL, request headers, and whether the host
//! saw it as a top-level navigation. Bodies never reach the gateway, since
//! only GET requests are ever intercepted.

pub mod url;

use http::{HeaderMap, HeaderValue, Method, header};

pub use self::url::{UrlError, canonicalize, resolve};

use crate::Error;

/// How the host issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// A top-level page navigation.
    Navigate,
    /// Any subresource or script-initiated request.
    #[default]
    Subresource,
}

/// A request intercepted by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: ::url::Url,
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl GatewayRequest {
    /// Build a request from its parts, normalizing the URL.
    pub fn new(method: Method, url: &str, headers: HeaderMap, mode: RequestMode) -> Result<Self, Error> {
        let url = canonicalize(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { method, url, headers, mode })
    }

    /// A plain GET subresource request.
    pub fn get(url: &str) -> Result<Self, Error> {
        Self::new(Method::GET, url, HeaderMap::new(), RequestMode::Subresource)
    }

    /// A top-level navigation to `url`.
    pub fn navigate(url: &str) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        Self::new(Method::GET, url, headers, RequestMode::Navigate)
    }

    /// Set a header, replacing any previous value.
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The `Accept` header, if present and valid UTF-8.
    pub fn accept(&self) -> Option<&str> {
        self.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok())
    }

    /// Whether this request is for the same origin as `origin`.
    pub fn is_same_origin(&self, origin: &::url::Url) -> bool {
        self.url.origin() == origin.origin()
    }
}
