//! Route definitions for the host.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use shellcache_core::GatewayStatus;

use crate::error::ProxyError;
use crate::proxy::proxy;
use crate::state::AppState;

pub const STATUS_PATH: &str = "/__shellcache/status";

/// Create the host router: the status endpoint, and the proxy for
/// everything else.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .fallback(proxy)
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<GatewayStatus>, ProxyError> {
    Ok(Json(state.gateway.status().await?))
}
