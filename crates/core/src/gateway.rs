//! The dispatcher every intercepted request goes through.
//!
//! `Gateway` holds no request state of its own. Everything it serves is
//! re-derived from the partition store and the configuration, and the
//! store records which version last activated, so a restarted gateway
//! resumes control with `restore` instead of reinstalling.

use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::cache::PartitionInfo;
use crate::fallback::OfflineFallback;
use crate::strategy::StrategyExecutor;
use crate::{
    ActivationReport, BypassReason, CacheStorage, Classifier, Disposition, Error, GatewayConfig, GatewayRequest,
    InstallReport, LifecycleController, LifecycleState, Network, PartitionName, PartitionRole, Route, ServedResponse,
};

/// What the host should do with a request.
#[derive(Debug)]
pub enum Outcome {
    /// Send the request to the network untouched.
    PassThrough(BypassReason),
    /// Reply with this response.
    Served(ServedResponse),
}

/// Snapshot of gateway state for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: LifecycleState,
    pub version: String,
    pub offline_document: String,
    pub partitions: Vec<PartitionInfo>,
}

/// The offline-caching gateway.
pub struct Gateway {
    storage: CacheStorage,
    network: Arc<dyn Network>,
    classifier: Classifier,
    fallback: OfflineFallback,
    lifecycle: LifecycleController,
    version: String,
}

impl Gateway {
    /// Build a gateway for `config`'s cache version.
    ///
    /// # Errors
    ///
    /// `InvalidUrl` if the offline document or a manifest entry does not
    /// resolve against the origin.
    pub fn new(config: &GatewayConfig, storage: CacheStorage, network: Arc<dyn Network>) -> Result<Self, Error> {
        let offline: Url = config.offline_document().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let manifest = config.manifest_urls().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let version = config.cache_version_tag.clone();

        let classifier =
            Classifier::new(config.origin.clone(), &config.static_path_prefix, &config.api_path_prefix);
        let fallback =
            OfflineFallback::new(storage.clone(), offline, config.partition(PartitionRole::Static).to_string());
        let lifecycle =
            LifecycleController::new(storage.clone(), network.clone(), version.clone(), manifest, config.precache_policy);

        Ok(Self { storage, network, classifier, fallback, lifecycle, version })
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Resume control if this version activated in an earlier run.
    pub async fn restore(&self) -> Result<bool, Error> {
        self.lifecycle.restore().await
    }

    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        self.lifecycle.activate().await
    }

    pub async fn is_controlling(&self) -> bool {
        self.lifecycle.is_controlling().await
    }

    /// Decide and, when intercepting, produce the response for `request`.
    ///
    /// # Errors
    ///
    /// `NetworkFailure` when the fetch failed and nothing could replace it;
    /// `FallbackUnavailable` when a navigation failed and the offline
    /// document was never cached. A cache miss is never returned.
    pub async fn handle(&self, request: &GatewayRequest) -> Result<Outcome, Error> {
        let class = match self.classifier.classify(request) {
            Disposition::Bypass(reason) => {
                tracing::trace!(method = %request.method, url = %request.url, ?reason, "passing through");
                return Ok(Outcome::PassThrough(reason));
            }
            Disposition::Intercept(class) => class,
        };

        if !self.lifecycle.is_controlling().await {
            return Ok(Outcome::PassThrough(BypassReason::NotControlling));
        }

        let route = Route::for_class(class);
        let partition = PartitionName::new(route.role, self.version.as_str());
        let fallback = route.offline_fallback.then_some(&self.fallback);
        let executor = StrategyExecutor::new(&self.storage, self.network.as_ref(), partition, fallback);

        let served = executor.run(route.strategy, request).await?;

        tracing::debug!(
            url = %request.url,
            ?class,
            strategy = ?route.strategy,
            partition = %executor.partition(),
            source = served.source.as_str(),
            status = served.response.status.as_u16(),
            "served"
        );

        Ok(Outcome::Served(served))
    }

    pub async fn status(&self) -> Result<GatewayStatus, Error> {
        Ok(GatewayStatus {
            state: self.lifecycle.state().await,
            version: self.version.clone(),
            offline_document: self.fallback.document().to_string(),
            partitions: self.storage.partition_stats().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fake::FakeNetwork;
    use crate::{PrecachePolicy, ResponseSnapshot, ResponseSource};
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    const OFFLINE_HTML: &str = "<!doctype html><h1>You are offline</h1>";

    fn config(version: &str) -> GatewayConfig {
        GatewayConfig {
            cache_version_tag: version.into(),
            precache_manifest: vec!["/".into(), "/offline/".into(), "/static/app.css".into()],
            ..Default::default()
        }
    }

    fn shell_network() -> Arc<FakeNetwork> {
        let net = Arc::new(FakeNetwork::new());
        net.respond("http://localhost:8000/", StatusCode::OK, "text/html", "<!doctype html><h1>ParkShare</h1>");
        net.respond("http://localhost:8000/offline/", StatusCode::OK, "text/html", OFFLINE_HTML);
        net.respond("http://localhost:8000/static/app.css", StatusCode::OK, "text/css", "body{margin:0}");
        net
    }

    async fn active_gateway(net: Arc<FakeNetwork>, version: &str) -> Gateway {
        let db = CacheStorage::open_in_memory().await.unwrap();
        let gateway = Gateway::new(&config(version), db, net).unwrap();
        gateway.install().await.unwrap();
        gateway.activate().await.unwrap();
        gateway
    }

    fn served(outcome: Outcome) -> ServedResponse {
        match outcome {
            Outcome::Served(served) => served,
            Outcome::PassThrough(reason) => panic!("expected a served response, got pass-through ({reason:?})"),
        }
    }

    #[tokio::test]
    async fn test_passes_through_until_active() {
        let net = shell_network();
        let db = CacheStorage::open_in_memory().await.unwrap();
        let gateway = Gateway::new(&config("v1"), db, net.clone()).unwrap();

        let req = GatewayRequest::get("http://localhost:8000/static/app.css").unwrap();
        assert!(matches!(
            gateway.handle(&req).await.unwrap(),
            Outcome::PassThrough(BypassReason::NotControlling)
        ));

        gateway.install().await.unwrap();
        assert!(matches!(gateway.handle(&req).await.unwrap(), Outcome::PassThrough(_)));

        gateway.activate().await.unwrap();
        assert!(matches!(gateway.handle(&req).await.unwrap(), Outcome::Served(_)));
    }

    #[tokio::test]
    async fn test_precached_shell_served_without_network() {
        let net = shell_network();
        let gateway = active_gateway(net.clone(), "v1").await;
        let after_install = net.calls();
        assert_eq!(after_install, 3);

        let css = served(
            gateway
                .handle(&GatewayRequest::get("http://localhost:8000/static/app.css").unwrap())
                .await
                .unwrap(),
        );
        assert_eq!(css.source, ResponseSource::Cache);
        assert_eq!(css.response.body, Bytes::from_static(b"body{margin:0}"));
        assert_eq!(net.calls(), after_install);
    }

    #[tokio::test]
    async fn test_static_asset_cached_after_first_fetch() {
        let net = shell_network();
        net.respond("http://localhost:8000/static/js/map.js", StatusCode::OK, "text/javascript", "initMap()");
        let gateway = active_gateway(net.clone(), "v1").await;
        let req = GatewayRequest::get("http://localhost:8000/static/js/map.js").unwrap();

        let first = served(gateway.handle(&req).await.unwrap());
        assert_eq!(first.source, ResponseSource::Network);
        let calls = net.calls();

        for _ in 0..3 {
            let again = served(gateway.handle(&req).await.unwrap());
            assert_eq!(again.source, ResponseSource::Cache);
        }
        assert_eq!(net.calls(), calls);
    }

    #[tokio::test]
    async fn test_api_response_replayed_offline() {
        let net = shell_network();
        net.respond("http://localhost:8000/api/spots", StatusCode::OK, "application/json", r#"{"spots":[]}"#);
        let gateway = active_gateway(net.clone(), "v1").await;
        let req = GatewayRequest::get("http://localhost:8000/api/spots").unwrap();

        let online = served(gateway.handle(&req).await.unwrap());
        assert_eq!(online.source, ResponseSource::Network);

        net.set_offline(true);
        let offline = served(gateway.handle(&req).await.unwrap());
        assert_eq!(offline.source, ResponseSource::Cache);
        assert_eq!(offline.response.body, Bytes::from_static(br#"{"spots":[]}"#));
    }

    #[tokio::test]
    async fn test_api_server_error_is_returned_but_not_stored() {
        let net = shell_network();
        net.respond("http://localhost:8000/api/spots", StatusCode::OK, "application/json", r#"{"spots":[1]}"#);
        let gateway = active_gateway(net.clone(), "v1").await;
        let req = GatewayRequest::get("http://localhost:8000/api/spots").unwrap();
        gateway.handle(&req).await.unwrap();

        net.respond("http://localhost:8000/api/spots", StatusCode::BAD_GATEWAY, "text/plain", "upstream down");
        let failed = served(gateway.handle(&req).await.unwrap());
        assert_eq!(failed.response.status, StatusCode::BAD_GATEWAY);

        net.set_offline(true);
        let replay = served(gateway.handle(&req).await.unwrap());
        assert_eq!(replay.response.body, Bytes::from_static(br#"{"spots":[1]}"#));
    }

    #[tokio::test]
    async fn test_uncached_navigation_offline_gets_offline_document() {
        let net = shell_network();
        let gateway = active_gateway(net.clone(), "v1").await;
        net.set_offline(true);

        let page = served(
            gateway
                .handle(&GatewayRequest::navigate("http://localhost:8000/dashboard/").unwrap())
                .await
                .unwrap(),
        );
        assert_eq!(page.source, ResponseSource::Offline);
        assert_eq!(page.response.body, Bytes::from_static(OFFLINE_HTML.as_bytes()));
    }

    #[tokio::test]
    async fn test_visited_navigation_offline_gets_its_own_copy() {
        let net = shell_network();
        net.respond("http://localhost:8000/dashboard/", StatusCode::OK, "text/html", "<h1>Dashboard</h1>");
        let gateway = active_gateway(net.clone(), "v1").await;
        let req = GatewayRequest::navigate("http://localhost:8000/dashboard/").unwrap();
        gateway.handle(&req).await.unwrap();

        net.set_offline(true);
        let page = served(gateway.handle(&req).await.unwrap());
        assert_eq!(page.source, ResponseSource::Cache);
        assert_eq!(page.response.body, Bytes::from_static(b"<h1>Dashboard</h1>"));
    }

    #[tokio::test]
    async fn test_navigation_without_offline_document_fails() {
        let net = Arc::new(FakeNetwork::new());
        let db = CacheStorage::open_in_memory().await.unwrap();
        let config = GatewayConfig { precache_policy: PrecachePolicy::BestEffort, ..config("v1") };
        let gateway = Gateway::new(&config, db, net.clone()).unwrap();
        gateway.install().await.unwrap();
        gateway.activate().await.unwrap();

        net.set_offline(true);
        let result = gateway
            .handle(&GatewayRequest::navigate("http://localhost:8000/dashboard/").unwrap())
            .await;
        assert!(matches!(result, Err(Error::FallbackUnavailable(_))));
    }

    #[tokio::test]
    async fn test_static_asset_offline_miss_fails_alone() {
        let net = shell_network();
        let gateway = active_gateway(net.clone(), "v1").await;
        net.set_offline(true);

        let missing = gateway
            .handle(&GatewayRequest::get("http://localhost:8000/static/img/logo.png").unwrap())
            .await;
        assert!(matches!(missing, Err(Error::NetworkFailure(_))));

        let css = gateway
            .handle(&GatewayRequest::get("http://localhost:8000/static/app.css").unwrap())
            .await;
        assert!(css.is_ok());
    }

    #[tokio::test]
    async fn test_post_and_cross_origin_never_touch_the_store() {
        let net = shell_network();
        let gateway = active_gateway(net.clone(), "v1").await;
        let before = gateway.storage().partition_stats().await.unwrap();

        let post = GatewayRequest::new(
            Method::POST,
            "http://localhost:8000/api/parking/spots/",
            HeaderMap::new(),
            crate::RequestMode::Subresource,
        )
        .unwrap();
        assert!(matches!(
            gateway.handle(&post).await.unwrap(),
            Outcome::PassThrough(BypassReason::NonGetMethod)
        ));

        let tiles = GatewayRequest::get("https://tile.openstreetmap.org/10/600/300.png").unwrap();
        assert!(matches!(
            gateway.handle(&tiles).await.unwrap(),
            Outcome::PassThrough(BypassReason::CrossOrigin)
        ));

        assert_eq!(gateway.storage().partition_stats().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_version_rollover_evicts_previous_version() {
        let net = shell_network();
        net.respond("http://localhost:8000/api/spots", StatusCode::OK, "application/json", "[]");
        let db = CacheStorage::open_in_memory().await.unwrap();

        let v2 = Gateway::new(&config("v2"), db.clone(), net.clone()).unwrap();
        v2.install().await.unwrap();
        v2.activate().await.unwrap();
        v2.handle(&GatewayRequest::get("http://localhost:8000/api/spots").unwrap())
            .await
            .unwrap();
        v2.handle(&GatewayRequest::navigate("http://localhost:8000/").unwrap())
            .await
            .unwrap();
        db.open_partition("avatars").await.unwrap();

        let v3 = Gateway::new(&config("v3"), db.clone(), net.clone()).unwrap();
        v3.install().await.unwrap();
        // v2 keeps serving from its own partitions while v3 installs
        assert_eq!(db.partition_names().await.unwrap(), vec!["avatars", "dynamic-v2", "html-v2", "static-v2", "static-v3"]);

        v3.activate().await.unwrap();
        assert_eq!(db.partition_names().await.unwrap(), vec!["avatars", "static-v3"]);

        let status = v3.status().await.unwrap();
        assert_eq!(status.state, LifecycleState::Active);
        assert_eq!(status.version, "v3");
        assert_eq!(status.offline_document, "http://localhost:8000/offline/");
    }

    #[tokio::test]
    async fn test_restart_restores_control_offline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        let online = Gateway::new(&config("v1"), CacheStorage::open(&path).await.unwrap(), shell_network()).unwrap();
        assert!(!online.restore().await.unwrap());
        online.install().await.unwrap();
        online.activate().await.unwrap();
        drop(online);

        let net = Arc::new(FakeNetwork::new());
        net.set_offline(true);
        let restarted = Gateway::new(&config("v1"), CacheStorage::open(&path).await.unwrap(), net.clone()).unwrap();
        assert!(restarted.restore().await.unwrap());
        assert!(restarted.is_controlling().await);

        let page = served(
            restarted
                .handle(&GatewayRequest::navigate("http://localhost:8000/dashboard/").unwrap())
                .await
                .unwrap(),
        );
        assert_eq!(page.source, ResponseSource::Offline);
        assert_eq!(page.response.body, Bytes::from_static(OFFLINE_HTML.as_bytes()));

        let css = served(
            restarted
                .handle(&GatewayRequest::get("http://localhost:8000/static/app.css").unwrap())
                .await
                .unwrap(),
        );
        assert_eq!(css.source, ResponseSource::Cache);
        assert_eq!(css.response.body, Bytes::from_static(b"body{margin:0}"));
    }

    #[tokio::test]
    async fn test_activation_leaves_foreign_caches_alone() {
        let net = shell_network();
        let db = CacheStorage::open_in_memory().await.unwrap();
        for name in ["static-assets", "html-fragments"] {
            db.open_partition(name).await.unwrap();
        }

        let gateway = Gateway::new(&config("v1"), db.clone(), net).unwrap();
        gateway.install().await.unwrap();
        let report = gateway.activate().await.unwrap();

        assert!(report.evicted.is_empty());
        assert_eq!(db.partition_names().await.unwrap(), vec!["html-fragments", "static-assets", "static-v1"]);
    }

    /// Answers every fetch with a distinct numbered body, tagged in `x-reply`.
    #[derive(Default)]
    struct NumberedNetwork {
        next: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Network for NumberedNetwork {
        async fn fetch(&self, _request: &GatewayRequest) -> Result<ResponseSnapshot, Error> {
            let n = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::task::yield_now().await;
            let mut headers = HeaderMap::new();
            headers.insert("x-reply", http::HeaderValue::from(n));
            Ok(ResponseSnapshot::new(StatusCode::OK, headers, format!("reply-{n}")))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refreshes_leave_one_whole_entry() {
        let db = CacheStorage::open_in_memory().await.unwrap();
        let gateway = Arc::new(Gateway::new(&config("v1"), db.clone(), Arc::new(NumberedNetwork::default())).unwrap());
        gateway.install().await.unwrap();
        gateway.activate().await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    let req = GatewayRequest::get("http://localhost:8000/api/spots").unwrap();
                    served(gateway.handle(&req).await.unwrap()).response.body
                })
            })
            .collect();
        let mut bodies = Vec::new();
        for task in tasks {
            bodies.push(task.await.unwrap());
        }

        let url = Url::parse("http://localhost:8000/api/spots").unwrap();
        let stored = db.match_entry("dynamic-v1", &Method::GET, &url).await.unwrap().unwrap();
        let tag = stored.headers.get("x-reply").unwrap().to_str().unwrap();
        assert_eq!(stored.body, Bytes::from(format!("reply-{tag}")));
        assert!(bodies.contains(&stored.body));
        assert_eq!(db.partition_stats().await.unwrap().iter().find(|p| p.name == "dynamic-v1").unwrap().entries, 1);
    }
}
