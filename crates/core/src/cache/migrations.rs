//! Database schema migrations.
//!
//! Applied versions are tracked in a `_migrations` table; each pending
//! migration runs in its own transaction together with its version row.

use std::num::ParseIntError;

use super::Error;
use tokio_rusqlite::{Connection, params};

/// Migration list: (version, SQL).
///
/// Migrations must be applied in order, and each runs exactly once.
const MIGRATIONS: &[(&str, &str)] = &[
    ("1", include_str!("../../migrations/001_partitions.sql")),
    ("2", include_str!("../../migrations/002_entry_lookup.sql")),
    ("3", include_str!("../../migrations/003_ownership.sql")),
];

/// Run any pending migrations.
///
/// This creates the _migrations table if it doesn't exist, checks the
/// current version, and applies any migrations that haven't been run yet.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(Error::from)?;

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
                row.get(0)
            })
            .map_err(Error::from)?;

        for (version, sql) in MIGRATIONS {
            let version_num: i64 = version
                .parse()
                .map_err(|e: ParseIntError| Error::MigrationFailed(e.to_string()))?;
            if version_num <= current {
                continue;
            }

            tracing::debug!(version = version_num, "applying cache migration");

            // Schema change and version bump land together or not at all.
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version_num, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let has_entries: bool = conn
            .call(|conn| {
                conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='entries')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();

        assert!(has_entries);
    }

    #[tokio::test]
    async fn test_migrations_version_tracking() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();

        let count: i64 = conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0)))
            .await
            .unwrap();

        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_ownership_schema_present() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();

        let (has_activation, has_role): (bool, bool) = conn
            .call(|conn| -> Result<(bool, bool), tokio_rusqlite::rusqlite::Error> {
                let activation = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='activation')",
                    [],
                    |row| row.get(0),
                )?;
                let role = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM pragma_table_info('partitions') WHERE name='role')",
                    [],
                    |row| row.get(0),
                )?;
                Ok((activation, role))
            })
            .await
            .unwrap();

        assert!(has_activation);
        assert!(has_role);
    }
}
