//! Entry reads and writes.
//!
//! An entry is an immutable snapshot of a response keyed by request
//! identity inside one partition. Only `200 OK` responses to GET requests
//! are ever written; everything else is refused before touching SQLite.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;
use url::Url;

use super::connection::CacheStorage;
use super::hash::compute_entry_key;
use super::partitions::PartitionName;
use crate::Error;

/// A replayable copy of a response: status, headers and the full body.
///
/// The body is reference-counted, so the copy handed to the page and the
/// copy written to the store are independent and cheap to make.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self { status, headers, body: body.into() }
    }

    /// Whether this response may be written to a partition.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Header values are stored hex-encoded so bytes outside visible ASCII
    /// replay exactly as captured.
    fn headers_json(&self) -> Result<String, Error> {
        let pairs: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), hex::encode(value.as_bytes())))
            .collect();
        Ok(serde_json::to_string(&pairs)?)
    }

    fn from_row(status: u16, headers_json: &str, body: Vec<u8>) -> Result<Self, Error> {
        let status = StatusCode::from_u16(status).map_err(|e| Error::Serialization(e.to_string()))?;
        let pairs: Vec<(String, String)> = serde_json::from_str(headers_json)?;

        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::Serialization(e.to_string()))?;
            let raw = hex::decode(&value).map_err(|e| Error::Serialization(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_bytes(&raw).map_err(|e| Error::Serialization(e.to_string()))?;
            headers.append(name, value);
        }

        Ok(Self { status, headers, body: Bytes::from(body) })
    }
}

/// An entry as found by a cross-partition lookup.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub partition: String,
    pub url: String,
    pub stored_at: String,
    pub response: ResponseSnapshot,
}

/// A gateway partition flattened for the connection thread.
struct Owner {
    name: String,
    role: &'static str,
    version: String,
}

impl From<&PartitionName> for Owner {
    fn from(partition: &PartitionName) -> Self {
        Self { name: partition.to_string(), role: partition.role.token(), version: partition.version.clone() }
    }
}

/// Row ready to be written; built outside the connection thread.
struct PendingEntry {
    key: String,
    method: String,
    url: String,
    status: u16,
    headers_json: String,
    body: Vec<u8>,
}

impl PendingEntry {
    fn build(method: &Method, url: &Url, snapshot: &ResponseSnapshot) -> Result<Self, Error> {
        Ok(Self {
            key: compute_entry_key(method, url),
            method: method.as_str().to_string(),
            url: url.to_string(),
            status: snapshot.status.as_u16(),
            headers_json: snapshot.headers_json()?,
            body: snapshot.body.to_vec(),
        })
    }

    fn write(&self, conn: &rusqlite::Connection, owner: &Owner, now: &str) -> Result<(), Error> {
        conn.execute(
            "INSERT INTO partitions (name, created_at, role, version) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET role = excluded.role, version = excluded.version",
            params![owner.name, now, owner.role, owner.version],
        )?;
        conn.execute(
            "INSERT INTO entries (partition, key, method, url, status, headers_json, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(partition, key) DO UPDATE SET
                method = excluded.method,
                url = excluded.url,
                status = excluded.status,
                headers_json = excluded.headers_json,
                body = excluded.body,
                stored_at = excluded.stored_at",
            params![owner.name, self.key, self.method, self.url, self.status, self.headers_json, self.body, now],
        )?;
        Ok(())
    }
}

impl CacheStorage {
    /// Store a response under `(method, url)` in `partition`, creating the
    /// partition if needed and recording the gateway as its owner.
    ///
    /// Returns `false` without writing when the request is not a GET or the
    /// response is not cacheable. A concurrent write to the same key wins or
    /// loses as a whole; readers never observe a partial entry.
    pub async fn put_entry(
        &self, partition: &PartitionName, method: &Method, url: &Url, snapshot: &ResponseSnapshot,
    ) -> Result<bool, Error> {
        if *method != Method::GET || !snapshot.is_cacheable() {
            tracing::debug!(%partition, %url, status = snapshot.status.as_u16(), "refusing to cache response");
            return Ok(false);
        }

        let pending = PendingEntry::build(method, url, snapshot)?;
        let owner = Owner::from(partition);
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                pending.write(&tx, &owner, &now)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(true)
    }

    /// Store several GET responses in `partition` in one transaction.
    ///
    /// Either every entry is written or none is. Any non-cacheable response
    /// rejects the whole batch before anything is written.
    pub async fn put_entries_atomic(
        &self, partition: &PartitionName, items: &[(Url, ResponseSnapshot)],
    ) -> Result<(), Error> {
        let mut pending = Vec::with_capacity(items.len());
        for (url, snapshot) in items {
            if !snapshot.is_cacheable() {
                return Err(Error::PrecacheFailure { failed: vec![url.to_string()] });
            }
            pending.push(PendingEntry::build(&Method::GET, url, snapshot)?);
        }

        let owner = Owner::from(partition);
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                for entry in &pending {
                    entry.write(&tx, &owner, &now)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up `(method, url)` in one partition.
    pub async fn match_entry(
        &self, partition: &str, method: &Method, url: &Url,
    ) -> Result<Option<ResponseSnapshot>, Error> {
        let key = compute_entry_key(method, url);
        let partition = partition.to_string();

        self.conn
            .call(move |conn| -> Result<Option<ResponseSnapshot>, Error> {
                let result = conn.query_row(
                    "SELECT status, headers_json, body FROM entries WHERE partition = ?1 AND key = ?2",
                    params![partition, key],
                    |row| Ok((row.get::<_, u16>(0)?, row.get::<_, String>(1)?, row.get::<_, Vec<u8>>(2)?)),
                );

                match result {
                    Ok((status, headers_json, body)) => Ok(Some(ResponseSnapshot::from_row(status, &headers_json, body)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Look up `(method, url)` across every partition.
    ///
    /// `preferred` is searched first; otherwise the most recently stored
    /// copy wins.
    pub async fn match_any(
        &self, method: &Method, url: &Url, preferred: Option<&str>,
    ) -> Result<Option<StoredEntry>, Error> {
        let key = compute_entry_key(method, url);
        let preferred = preferred.unwrap_or_default().to_string();

        self.conn
            .call(move |conn| -> Result<Option<StoredEntry>, Error> {
                let result = conn.query_row(
                    "SELECT partition, url, stored_at, status, headers_json, body FROM entries
                     WHERE key = ?1
                     ORDER BY (partition = ?2) DESC, stored_at DESC
                     LIMIT 1",
                    params![key, preferred],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, u16>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Vec<u8>>(5)?,
                        ))
                    },
                );

                match result {
                    Ok((partition, url, stored_at, status, headers_json, body)) => Ok(Some(StoredEntry {
                        partition,
                        url,
                        stored_at,
                        response: ResponseSnapshot::from_row(status, &headers_json, body)?,
                    })),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }
}
