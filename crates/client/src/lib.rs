//! Upstream client for shellcache.
//!
//! This crate provides the HTTP fetch pipeline the gateway uses as its
//! network, plus plain forwarding for requests it does not intercept.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig};
