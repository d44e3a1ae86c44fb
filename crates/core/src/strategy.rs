//! Caching strategies.
//!
//! `Route::for_class` is the total mapping from request class to strategy,
//! partition role and fallback. `StrategyExecutor` runs one strategy bound
//! to exactly one partition; it never reads or writes any other.
//!
//! | Class | Strategy | Partition | Offline fallback |
//! |---|---|---|---|
//! | navigation-html | network-first | html | yes |
//! | static-asset | cache-first | static | no |
//! | api | network-first | dynamic | no |
//! | other | cache-first | static | no |

use serde::Serialize;

use crate::fallback::OfflineFallback;
use crate::{
    CacheStorage, Error, GatewayRequest, Network, PartitionName, PartitionRole, RequestClass, ResponseSnapshot,
};

/// A caching algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from the partition; go to the network only on a miss.
    CacheFirst,
    /// Go to the network; use the partition only when the fetch fails.
    NetworkFirst,
}

/// Where a request is sent and how it is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,
    pub role: PartitionRole,
    pub offline_fallback: bool,
}

impl Route {
    pub fn for_class(class: RequestClass) -> Self {
        match class {
            RequestClass::NavigationHtml => {
                Route { strategy: Strategy::NetworkFirst, role: PartitionRole::Html, offline_fallback: true }
            }
            RequestClass::StaticAsset | RequestClass::Other => {
                Route { strategy: Strategy::CacheFirst, role: PartitionRole::Static, offline_fallback: false }
            }
            RequestClass::Api => {
                Route { strategy: Strategy::NetworkFirst, role: PartitionRole::Dynamic, offline_fallback: false }
            }
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    Offline,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Offline => "offline",
        }
    }
}

/// A response produced by the gateway.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
}

impl ServedResponse {
    fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// One strategy invocation bound to a partition and an optional fallback.
pub struct StrategyExecutor<'a> {
    storage: &'a CacheStorage,
    network: &'a dyn Network,
    partition: PartitionName,
    name: String,
    fallback: Option<&'a OfflineFallback>,
}

impl<'a> StrategyExecutor<'a> {
    pub fn new(
        storage: &'a CacheStorage, network: &'a dyn Network, partition: PartitionName,
        fallback: Option<&'a OfflineFallback>,
    ) -> Self {
        let name = partition.to_string();
        Self { storage, network, partition, name, fallback }
    }

    pub fn partition(&self) -> &PartitionName {
        &self.partition
    }

    pub async fn run(&self, strategy: Strategy, request: &GatewayRequest) -> Result<ServedResponse, Error> {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
        }
    }

    /// Cache hit returns with no network attempt and no revalidation.
    pub async fn cache_first(&self, request: &GatewayRequest) -> Result<ServedResponse, Error> {
        match self.lookup(request).await {
            Ok(hit) => return Ok(ServedResponse::new(hit, ResponseSource::Cache)),
            Err(miss) => tracing::trace!(%miss, "fetching"),
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                self.store(request, &response).await;
                Ok(ServedResponse::new(response, ResponseSource::Network))
            }
            Err(err) => self.recover(request, err).await,
        }
    }

    /// A completed fetch is returned as-is; only a failed one falls back to
    /// the last-known-good entry.
    pub async fn network_first(&self, request: &GatewayRequest) -> Result<ServedResponse, Error> {
        let err = match self.network.fetch(request).await {
            Ok(response) => {
                self.store(request, &response).await;
                return Ok(ServedResponse::new(response, ResponseSource::Network));
            }
            Err(err) => err,
        };

        tracing::debug!(url = %request.url, partition = %self.name, error = %err, "fetch failed, trying cache");

        match self.lookup(request).await {
            Ok(hit) => Ok(ServedResponse::new(hit, ResponseSource::Cache)),
            Err(miss) => {
                tracing::debug!(%miss, "no stored copy");
                self.recover(request, err).await
            }
        }
    }

    async fn recover(&self, request: &GatewayRequest, err: Error) -> Result<ServedResponse, Error> {
        match self.fallback {
            Some(fallback) => fallback
                .resolve(&err)
                .await
                .map(|doc| ServedResponse::new(doc, ResponseSource::Offline)),
            None => {
                tracing::debug!(url = %request.url, error = %err, "no fallback, propagating failure");
                Err(err)
            }
        }
    }

    /// Always `CacheMiss` when nothing usable is stored; a store failure
    /// reads as a miss.
    async fn lookup(&self, request: &GatewayRequest) -> Result<ResponseSnapshot, Error> {
        let miss = || Error::CacheMiss(format!("{} {} in {}", request.method, request.url, self.name));

        match self
            .storage
            .match_entry(&self.name, &request.method, &request.url)
            .await
        {
            Ok(Some(hit)) => Ok(hit),
            Ok(None) => Err(miss()),
            Err(e) => {
                tracing::warn!(url = %request.url, partition = %self.name, error = %e, "cache lookup failed");
                Err(miss())
            }
        }
    }

    /// Writes only cacheable responses. A failed write is logged; the live
    /// response is still served.
    async fn store(&self, request: &GatewayRequest, response: &ResponseSnapshot) {
        if !response.is_cacheable() {
            tracing::debug!(url = %request.url, status = response.status.as_u16(), "not caching response");
            return;
        }

        if let Err(e) = self
            .storage
            .put_entry(&self.partition, &request.method, &request.url, response)
            .await
        {
            tracing::warn!(url = %request.url, partition = %self.name, error = %e, "cache write failed");
        }
    }
}
