//! Install and activate.
//!
//! A controller is single-use per cache version and only moves forward:
//!
//! ```text
//! Installing ──install──▶ Installed ──activate──▶ Activating ──▶ Active
//!      │  │                                                        ▲
//!      │  └──restore (version already activated in the store)──────┘
//!      └──strict precache failure──▶ Redundant
//! ```
//!
//! Install only ever writes the current static partition. Stale partitions
//! are deleted at activation, never earlier, so a previous version can keep
//! serving from its own partitions while the new one installs. A completed
//! activation is recorded in the store, so a restarted process resumes
//! control without fetching anything.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::{
    CacheStorage, Error, GatewayRequest, Network, PartitionName, PartitionRole, PrecachePolicy, ResponseSnapshot,
};

/// Lifecycle state of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
    /// Install failed; this version will never control pages.
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Result of a completed install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub partition: String,
    pub precached: Vec<String>,
    /// Entries that could not be precached (best-effort policy only).
    pub failed: Vec<String>,
    /// The new version supersedes the previous one without waiting for
    /// its pages to close.
    pub skip_waiting: bool,
}

/// Result of a completed activation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub retained: Vec<String>,
    pub evicted: Vec<String>,
    /// Stale partitions whose deletion failed; retried on the next activation.
    pub failed: Vec<String>,
    /// Names the gateway does not manage, left as they were.
    pub unmanaged: Vec<String>,
    /// Open pages are controlled immediately rather than on their next load.
    pub clients_claimed: bool,
}

/// Drives install and activate for one cache version.
pub struct LifecycleController {
    storage: CacheStorage,
    network: Arc<dyn Network>,
    version: String,
    manifest: Vec<Url>,
    policy: PrecachePolicy,
    state: RwLock<LifecycleState>,
    transition: Mutex<()>,
}

impl LifecycleController {
    pub fn new(
        storage: CacheStorage, network: Arc<dyn Network>, version: impl Into<String>, manifest: Vec<Url>,
        policy: PrecachePolicy,
    ) -> Self {
        Self {
            storage,
            network,
            version: version.into(),
            manifest,
            policy,
            state: RwLock::new(LifecycleState::Installing),
            transition: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Whether requests from pages are intercepted.
    pub async fn is_controlling(&self) -> bool {
        self.state().await == LifecycleState::Active
    }

    fn static_partition(&self) -> PartitionName {
        PartitionName::new(PartitionRole::Static, self.version.as_str())
    }

    async fn expect_state(&self, expected: LifecycleState, operation: &'static str) -> Result<(), Error> {
        let current = self.state().await;
        if current != expected {
            return Err(Error::InvalidTransition { from: current.to_string(), operation });
        }
        Ok(())
    }

    async fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.write().await;
        let from = *state;
        tracing::debug!(version = %self.version, %from, to = %next, "lifecycle transition");
        *state = next;
    }

    /// Take control straight away if this version completed activation in
    /// an earlier run and its precached shell is still in the store.
    ///
    /// Returns whether the controller is now `Active`. When it is not, the
    /// caller proceeds with `install`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the controller is `Installing`.
    pub async fn restore(&self) -> Result<bool, Error> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Installing, "restore").await?;

        if self.storage.activated_version().await?.as_deref() != Some(self.version.as_str()) {
            return Ok(false);
        }

        let shell = self.static_partition();
        let precached = self
            .storage
            .partition_stats()
            .await?
            .iter()
            .any(|p| p.entries > 0 && p.owner().as_ref() == Some(&shell));
        if !precached {
            tracing::warn!(version = %self.version, partition = %shell, "activated version has no precached shell; reinstalling");
            return Ok(false);
        }

        self.set_state(LifecycleState::Active).await;
        tracing::info!(version = %self.version, "restored control from the store");
        Ok(true)
    }

    /// Populate the static partition from the precache manifest.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` unless the controller is `Installing`
    /// - `PrecacheFailure` under the strict policy when any entry fails;
    ///   nothing is written and the controller becomes `Redundant`
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Installing, "install").await?;

        let partition = self.static_partition();
        tracing::info!(version = %self.version, %partition, entries = self.manifest.len(), policy = ?self.policy, "installing");

        let mut fetched: Vec<(Url, ResponseSnapshot)> = Vec::with_capacity(self.manifest.len());
        let mut failed = Vec::new();

        for url in &self.manifest {
            match self.fetch_manifest_entry(url).await {
                Ok(response) => fetched.push((url.clone(), response)),
                Err(reason) => {
                    tracing::warn!(%url, %reason, "precache entry failed");
                    failed.push(url.to_string());
                }
            }
        }

        let precached = match self.policy {
            PrecachePolicy::Strict => match self.write_all_or_nothing(&partition, &fetched, failed.clone()).await {
                Ok(precached) => precached,
                Err(err) => {
                    tracing::error!(version = %self.version, error = %err, "install failed; previous version stays in control");
                    self.set_state(LifecycleState::Redundant).await;
                    return Err(err);
                }
            },
            PrecachePolicy::BestEffort => self.write_each(&partition, &fetched, &mut failed).await,
        };

        self.set_state(LifecycleState::Installed).await;
        tracing::info!(version = %self.version, precached = precached.len(), failed = failed.len(), "installed");

        Ok(InstallReport { partition: partition.to_string(), precached, failed, skip_waiting: true })
    }

    async fn fetch_manifest_entry(&self, url: &Url) -> Result<ResponseSnapshot, String> {
        let request = GatewayRequest::get(url.as_str()).map_err(|e| e.to_string())?;
        let response = self.network.fetch(&request).await.map_err(|e| e.to_string())?;
        if !response.is_cacheable() {
            return Err(format!("status {}", response.status.as_u16()));
        }
        Ok(response)
    }

    async fn write_all_or_nothing(
        &self, partition: &PartitionName, fetched: &[(Url, ResponseSnapshot)], failed: Vec<String>,
    ) -> Result<Vec<String>, Error> {
        if !failed.is_empty() {
            return Err(Error::PrecacheFailure { failed });
        }
        self.storage.put_entries_atomic(partition, fetched).await?;
        Ok(fetched.iter().map(|(url, _)| url.to_string()).collect())
    }

    async fn write_each(
        &self, partition: &PartitionName, fetched: &[(Url, ResponseSnapshot)], failed: &mut Vec<String>,
    ) -> Vec<String> {
        let mut precached = Vec::with_capacity(fetched.len());
        for (url, response) in fetched {
            match self
                .storage
                .put_entry(partition, &http::Method::GET, url, response)
                .await
            {
                Ok(true) => precached.push(url.to_string()),
                Ok(false) => failed.push(url.to_string()),
                Err(e) => {
                    tracing::warn!(%url, error = %e, "precache write failed");
                    failed.push(url.to_string());
                }
            }
        }
        precached
    }

    /// Evict every gateway partition of another version, then take control.
    ///
    /// The retained set is exactly this version's partitions across all
    /// roles. Partitions the gateway does not own are never touched. Each
    /// deletion stands alone: one failing does not stop the others.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the controller is `Installed`.
    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        let _guard = self.transition.lock().await;
        self.expect_state(LifecycleState::Installed, "activate").await?;
        self.set_state(LifecycleState::Activating).await;

        let current = PartitionName::all_for_version(&self.version);
        let mut report = ActivationReport::default();

        match self.storage.partition_stats().await {
            Ok(partitions) => {
                for partition in partitions {
                    let name = partition.name.clone();
                    match partition.owner() {
                        None => report.unmanaged.push(name),
                        Some(owner) if current.contains(&owner) => report.retained.push(name),
                        Some(_) => match self.storage.delete_partition(&name).await {
                            Ok(_) => {
                                tracing::info!(partition = %name, "evicted stale partition");
                                report.evicted.push(name);
                            }
                            Err(e) => {
                                tracing::warn!(partition = %name, error = %e, "failed to evict stale partition");
                                report.failed.push(name);
                            }
                        },
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not enumerate partitions; eviction deferred to next activation");
            }
        }

        if let Err(e) = self.storage.record_activation(&self.version).await {
            tracing::warn!(version = %self.version, error = %e, "activation not recorded; next start will reinstall");
        }

        self.set_state(LifecycleState::Active).await;
        report.clients_claimed = true;

        tracing::info!(
            version = %self.version,
            retained = report.retained.len(),
            evicted = report.evicted.len(),
            failed = report.failed.len(),
            "activated"
        );

        Ok(report)
    }
}
