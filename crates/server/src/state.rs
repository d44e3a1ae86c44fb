//! Application state shared across handlers.

use std::sync::Arc;

use shellcache_client::FetchClient;
use shellcache_core::{CacheStorage, Error, Gateway, GatewayConfig, Network};
use url::Url;

/// Application state shared across all handlers.
pub struct AppState {
    pub gateway: Gateway,
    /// Also the gateway's network; used directly for pass-through.
    pub client: Arc<FetchClient>,
    pub origin: Url,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &GatewayConfig, storage: CacheStorage, client: Arc<FetchClient>) -> Result<Self, Error> {
        let network: Arc<dyn Network> = client.clone();
        let gateway = Gateway::new(config, storage, network)?;

        Ok(Self { gateway, client, origin: config.origin.clone(), max_body_bytes: config.max_bytes })
    }

    /// Resume the version activated in an earlier run, or install then
    /// activate. A failed first install leaves the gateway passing every
    /// request through.
    pub async fn bring_up(&self) {
        match self.gateway.restore().await {
            Ok(true) => {
                tracing::info!("gateway active from stored cache");
                return;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "could not read activation record; installing"),
        }

        match self.gateway.install().await {
            Ok(report) => {
                tracing::info!(
                    partition = %report.partition,
                    precached = report.precached.len(),
                    failed = report.failed.len(),
                    "install complete"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "install failed; requests will pass through");
                return;
            }
        }

        match self.gateway.activate().await {
            Ok(report) => {
                tracing::info!(
                    retained = ?report.retained,
                    evicted = ?report.evicted,
                    failed = ?report.failed,
                    "gateway active"
                );
            }
            Err(e) => tracing::warn!(error = %e, "activation failed"),
        }
    }
}
