//! The catch-all handler: every request the host receives is offered to the
//! gateway, then served from its answer or forwarded upstream.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header, request::Parts};
use axum::response::{IntoResponse, Response};
use shellcache_core::{GatewayRequest, Outcome, RequestMode, ResponseSnapshot, ResponseSource};
use url::Url;

use crate::error::ProxyError;
use crate::state::AppState;

/// Response header naming where a served response came from.
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-shellcache-source");

const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// Rebuild the absolute URL the client asked for: the origin's scheme, the
/// `Host` header (the origin's host when absent), then path and query.
///
/// The `Host` header comes from the client and is not checked, so it alone
/// decides whether a request counts as same-origin. A client can send the
/// origin's host for any path and have the reply cached under the origin.
/// That is acceptable for a proxy bound to a local, single-user address; a
/// shared deployment must sit behind something that pins `Host`.
pub fn request_url(origin: &Url, parts: &Parts) -> String {
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            origin.host_str().map(|h| match origin.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            })
        })
        .unwrap_or_default();

    let path = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{}://{}{}", origin.scheme(), host, path)
}

pub fn request_mode(headers: &HeaderMap) -> RequestMode {
    match headers.get(SEC_FETCH_MODE).and_then(|v| v.to_str().ok()) {
        Some(mode) if mode.eq_ignore_ascii_case("navigate") => RequestMode::Navigate,
        _ => RequestMode::Subresource,
    }
}

fn snapshot_response(snapshot: ResponseSnapshot, source: Option<ResponseSource>) -> Response {
    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = snapshot.status;
    *response.headers_mut() = snapshot.headers;
    if let Some(source) = source {
        response.headers_mut().insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
    }
    response
}

pub async fn proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match handle(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle(state: &AppState, request: Request) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let url = request_url(&state.origin, &parts);
    let mode = request_mode(&parts.headers);

    let gateway_request = GatewayRequest::new(parts.method.clone(), &url, parts.headers.clone(), mode)
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    match state.gateway.handle(&gateway_request).await? {
        Outcome::Served(served) => Ok(snapshot_response(served.response, Some(served.source))),
        Outcome::PassThrough(reason) => {
            tracing::trace!(method = %parts.method, %url, ?reason, "forwarding");
            let body: Bytes = axum::body::to_bytes(body, state.max_body_bytes)
                .await
                .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {e}")))?;
            let response = state
                .client
                .forward(parts.method, &gateway_request.url, &parts.headers, body)
                .await?;
            Ok(snapshot_response(response, None))
        }
    }
}
