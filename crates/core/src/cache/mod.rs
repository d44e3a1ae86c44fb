//! SQLite-backed partition store for response snapshots.
//!
//! This module provides durable, versioned key/value storage using SQLite
//! with async access via tokio-rusqlite. It supports:
//!
//! - Named partitions created on first write
//! - Request-identity keys derived with SHA-256
//! - Per-key atomic upserts and all-or-nothing batch writes
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod partitions;

pub use crate::Error;

pub use connection::CacheStorage;
pub use entries::{ResponseSnapshot, StoredEntry};
pub use partitions::{PartitionInfo, PartitionName, PartitionRole};
