//! Core of the shellcache offline gateway.
//!
//! This crate provides:
//! - Versioned cache partitions with a SQLite backend
//! - Request classification and the caching strategies
//! - The offline fallback and the install/activate lifecycle
//! - Unified error types and configuration

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod lifecycle;
pub mod network;
pub mod request;
pub mod strategy;

pub use cache::{CacheStorage, PartitionInfo, PartitionName, PartitionRole, ResponseSnapshot};
pub use classify::{BypassReason, Classifier, Disposition, RequestClass};
pub use config::{ConfigError, GatewayConfig, PrecachePolicy};
pub use error::Error;
pub use fallback::OfflineFallback;
pub use gateway::{Gateway, GatewayStatus, Outcome};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
pub use network::Network;
pub use request::{GatewayRequest, RequestMode};
pub use strategy::{ResponseSource, Route, ServedResponse, Strategy, StrategyExecutor};
