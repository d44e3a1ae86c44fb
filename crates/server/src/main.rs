//! shellcache host entry point.
//!
//! Boots the gateway behind an HTTP reverse proxy. The gateway installs and
//! activates in the background; until then every request is forwarded.
//! Logging goes to stderr as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use shellcache_client::{FetchClient, FetchConfig};
use shellcache_core::{CacheStorage, GatewayConfig};
use tracing_subscriber::EnvFilter;

mod error;
mod proxy;
mod routes;
mod state;

const CONFIG_FILE_ENV: &str = "SHELLCACHE_CONFIG_FILE";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config_path = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    tracing::info!(
        origin = %config.origin,
        upstream = %config.upstream(),
        version = %config.cache_version_tag,
        db = %config.db_path.display(),
        "starting shellcache"
    );

    let storage = CacheStorage::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open cache at {}", config.db_path.display()))?;
    let client = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let state = Arc::new(state::AppState::new(&config, storage, client)?);

    let lifecycle = state.clone();
    tokio::spawn(async move { lifecycle.bring_up().await });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, routes::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
