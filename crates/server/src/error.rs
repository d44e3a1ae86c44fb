//! Structured errors for the shellcache host.
//!
//! Gateway failures become the host's generic connectivity-error page.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use shellcache_core::Error;

/// Structured errors for the shellcache host.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The incoming request could not be turned into a gateway request.
    #[error("INVALID_REQUEST: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Gateway(#[from] Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Gateway(err) if err.is_network_failure() => StatusCode::BAD_GATEWAY,
            ProxyError::Gateway(Error::FallbackUnavailable(_)) => StatusCode::BAD_GATEWAY,
            ProxyError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}
