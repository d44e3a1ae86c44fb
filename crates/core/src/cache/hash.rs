//! Request-identity cache keys.

use http::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// Compute the entry key for a request identity (method + normalized URL).
pub fn compute_entry_key(method: &Method, url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
