//! Offline fallback resolution.
//!
//! The terminal step for navigations: serve the precached offline document,
//! or fail loudly. Never produces an empty response.

use http::Method;
use url::Url;

use crate::{CacheStorage, Error, ResponseSnapshot};

/// Resolves the offline document from the partition store.
#[derive(Debug, Clone)]
pub struct OfflineFallback {
    storage: CacheStorage,
    document: Url,
    designated: String,
}

impl OfflineFallback {
    /// `designated` is the partition searched first (where precache puts the
    /// document); every other partition is searched after it.
    pub fn new(storage: CacheStorage, document: Url, designated: impl Into<String>) -> Self {
        Self { storage, document, designated: designated.into() }
    }

    pub fn document(&self) -> &Url {
        &self.document
    }

    /// Resolve the offline document after `cause` made every other step fail.
    pub async fn resolve(&self, cause: &Error) -> Result<ResponseSnapshot, Error> {
        match self
            .storage
            .match_any(&Method::GET, &self.document, Some(&self.designated))
            .await
        {
            Ok(Some(entry)) => {
                tracing::info!(document = %self.document, partition = %entry.partition, %cause, "serving offline document");
                Ok(entry.response)
            }
            Ok(None) => Err(Error::FallbackUnavailable(format!("{} is not cached ({cause})", self.document))),
            Err(e) => {
                tracing::warn!(document = %self.document, error = %e, "offline document lookup failed");
                Err(Error::FallbackUnavailable(format!("{} lookup failed: {e} ({cause})", self.document)))
            }
        }
    }
}
