//! The network seam.
//!
//! The gateway never talks HTTP itself; the host supplies a `Network`
//! implementation (see `shellcache-client` for the reqwest one).

use async_trait::async_trait;

use crate::{Error, GatewayRequest, ResponseSnapshot};

/// Performs the real network fetch for an intercepted request.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch `request` from the network.
    ///
    /// `Ok` means the fetch completed, whatever the status code. `Err` means
    /// it could not complete (DNS, connection, timeout, offline).
    async fn fetch(&self, request: &GatewayRequest) -> Result<ResponseSnapshot, Error>;
}
