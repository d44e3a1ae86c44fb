//! Unified error types for shellcache.
//!
//! Display strings carry an upper-snake code prefix so log lines and the
//! host's error pages stay greppable.

use tokio_rusqlite::rusqlite;

/// Unified error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The network fetch could not complete (DNS, refused, timeout, offline).
    #[error("NETWORK_FAILURE: {0}")]
    NetworkFailure(String),

    /// The response body exceeded the configured byte cap.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// No entry for the request in the targeted partition.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// One or more precache manifest entries could not be fetched.
    #[error("PRECACHE_FAILURE: {} of the manifest entries failed: {}", failed.len(), failed.join(", "))]
    PrecacheFailure { failed: Vec<String> },

    /// The offline document is not present in any partition.
    #[error("FALLBACK_UNAVAILABLE: {0}")]
    FallbackUnavailable(String),

    /// A lifecycle operation was called from a state that does not allow it.
    #[error("INVALID_TRANSITION: cannot {operation} while {from}")]
    InvalidTransition { from: String, operation: &'static str },

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored entry could not be encoded or decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error means the fetch itself failed, as opposed to a
    /// completed fetch with an unwanted status.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Error::NetworkFailure(_) | Error::FetchTooLarge(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
