//! Partition naming, ownership and partition-level store operations.
//!
//! A gateway partition is named `{role}-{version}`, e.g. `static-v3`, and
//! carries its role and version in the row itself. Ownership is recorded
//! when the gateway first writes into a partition; it is never inferred
//! from the name. Any other partition belongs to someone else and is left
//! alone.

use std::fmt;

use super::connection::CacheStorage;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

/// The role a partition plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    /// App shell and static assets (precache target).
    Static,
    /// API data.
    Dynamic,
    /// HTML documents reached by navigation.
    Html,
}

impl PartitionRole {
    pub const ALL: [PartitionRole; 3] = [PartitionRole::Static, PartitionRole::Dynamic, PartitionRole::Html];

    pub fn token(self) -> &'static str {
        match self {
            PartitionRole::Static => "static",
            PartitionRole::Dynamic => "dynamic",
            PartitionRole::Html => "html",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.token() == token)
    }
}

/// Identity of a gateway partition: `(role, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionName {
    pub role: PartitionRole,
    pub version: String,
}

impl PartitionName {
    pub fn new(role: PartitionRole, version: impl Into<String>) -> Self {
        Self { role, version: version.into() }
    }

    /// The partitions that make up one version across all roles.
    pub fn all_for_version(version: &str) -> Vec<Self> {
        PartitionRole::ALL
            .into_iter()
            .map(|role| Self::new(role, version))
            .collect()
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role.token(), self.version)
    }
}

/// Summary of one stored partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub name: String,
    /// Set only on partitions the gateway owns.
    pub role: Option<PartitionRole>,
    pub version: Option<String>,
    pub entries: u64,
    pub created_at: String,
}

impl PartitionInfo {
    /// The gateway partition this row is, or `None` if it belongs to
    /// someone else.
    pub fn owner(&self) -> Option<PartitionName> {
        Some(PartitionName::new(self.role?, self.version.clone()?))
    }
}

impl CacheStorage {
    /// Create a partition the gateway does not own.
    #[cfg(test)]
    pub(crate) async fn open_partition(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    #[cfg(test)]
    pub(crate) async fn partition_names(&self) -> Result<Vec<String>, Error> {
        Ok(self.partition_stats().await?.into_iter().map(|p| p.name).collect())
    }

    /// List every partition, owned or not, with its entry count.
    pub async fn partition_stats(&self) -> Result<Vec<PartitionInfo>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<PartitionInfo>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT p.name, p.role, p.version, COUNT(e.key), p.created_at
                     FROM partitions p LEFT JOIN entries e ON e.partition = p.name
                     GROUP BY p.name ORDER BY p.name",
                )?;
                let stats = stmt
                    .query_map([], |row| {
                        let role: Option<String> = row.get(1)?;
                        Ok(PartitionInfo {
                            name: row.get(0)?,
                            role: role.as_deref().and_then(PartitionRole::from_token),
                            version: row.get(2)?,
                            entries: row.get::<_, i64>(3)? as u64,
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a partition and all of its entries.
    ///
    /// Returns whether the partition existed.
    pub async fn delete_partition(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM partitions WHERE name = ?1", params![name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Record `version` as the one in control. Replaces any earlier record.
    pub async fn record_activation(&self, version: &str) -> Result<(), Error> {
        let version = version.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO activation (id, version, activated_at) VALUES (1, ?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET version = excluded.version, activated_at = excluded.activated_at",
                    params![version, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// The version that last completed activation, if any.
    pub async fn activated_version(&self) -> Result<Option<String>, Error> {
        self.conn
            .call(|conn| -> Result<Option<String>, Error> {
                let version = conn
                    .query_row("SELECT version FROM activation WHERE id = 1", [], |row| row.get(0))
                    .optional()?;
                Ok(version)
            })
            .await
            .map_err(Error::from)
    }
}
