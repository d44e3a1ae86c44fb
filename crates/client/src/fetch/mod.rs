//! HTTP fetch pipeline toward the upstream origin.
//!
//! ### Rebasing
//! - Requests arrive addressed to the gateway origin.
//! - When an upstream is configured, scheme, host and port are swapped for
//!   the upstream's; path and query are kept.
//!
//! ### Limits
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable), enforced while streaming
//! - Timeout: 20s (configurable)
//!
//! Any completed exchange is a response, whatever its status. Only a fetch
//! that could not complete is an error.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, header};
use reqwest::Client;
use url::Url;

use shellcache_core::{Error, GatewayConfig, GatewayRequest, Network, ResponseSnapshot};

/// Request headers that describe the client connection, not the request.
const HOP_BY_HOP: [header::HeaderName; 6] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::ACCEPT_ENCODING,
    header::UPGRADE,
];

/// Response headers that no longer describe the body once reqwest has
/// decoded it.
const BODY_FRAMING: [header::HeaderName; 3] =
    [header::CONTENT_ENCODING, header::CONTENT_LENGTH, header::TRANSFER_ENCODING];

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "shellcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Where requests are actually sent. `None` sends them to the URL as given.
    pub upstream: Option<Url>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "shellcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
            upstream: None,
        }
    }
}

impl From<&GatewayConfig> for FetchConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_redirects: config.max_redirects,
            upstream: config.upstream.clone(),
        }
    }
}

/// HTTP client the gateway uses as its network.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::NetworkFailure(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// The URL a request for `url` is actually sent to.
    pub fn upstream_url(&self, url: &Url) -> Url {
        let Some(upstream) = &self.config.upstream else {
            return url.clone();
        };

        let mut target = upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        target
    }

    /// Send a request the gateway does not intercept, body and all.
    pub async fn forward(
        &self, method: Method, url: &Url, headers: &HeaderMap, body: Bytes,
    ) -> Result<ResponseSnapshot, Error> {
        self.send(method, url, headers, Some(body)).await
    }

    async fn send(
        &self, method: Method, url: &Url, headers: &HeaderMap, body: Option<Bytes>,
    ) -> Result<ResponseSnapshot, Error> {
        let start = Instant::now();
        let target = self.upstream_url(url);

        let mut outgoing = headers.clone();
        for name in &HOP_BY_HOP {
            outgoing.remove(name);
        }

        let mut request = self.http.request(method.clone(), target.as_str()).headers(outgoing);
        if let Some(body) = body {
            request = request.body(body);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| Error::NetworkFailure(format!("{} {}: {}", method, target, e)))?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let mut headers = response.headers().clone();
        for name in &BODY_FRAMING {
            headers.remove(name);
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::NetworkFailure(format!("failed to read response from {}: {}", target, e)))?
        {
            if body.len() + chunk.len() > self.config.max_bytes {
                return Err(Error::FetchTooLarge(format!(
                    "more than {} bytes from {}",
                    self.config.max_bytes, target
                )));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(
            "{} {} -> {} in {}ms ({} bytes)",
            method,
            target,
            status.as_u16(),
            start.elapsed().as_millis(),
            body.len()
        );

        Ok(ResponseSnapshot::new(status, headers, body.freeze()))
    }
}

#[async_trait::async_trait]
impl Network for FetchClient {
    async fn fetch(&self, request: &GatewayRequest) -> Result<ResponseSnapshot, Error> {
        self.send(request.method.clone(), &request.url, &request.headers, None).await
    }
}
