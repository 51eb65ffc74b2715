//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS pull_requests (
                message_id TEXT PRIMARY KEY,
                subsystem TEXT NOT NULL,
                subject TEXT NOT NULL,
                sender TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                merge_commit_hash TEXT,
                merge_url TEXT,
                merged_at TEXT,
                thread_refs TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_pull_requests_state ON pull_requests(state);
            CREATE INDEX IF NOT EXISTS idx_pull_requests_submitted ON pull_requests(submitted_at);

            CREATE TABLE IF NOT EXISTS pull_request_refs (
                ref_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                PRIMARY KEY (ref_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_pull_request_refs_message
                ON pull_request_refs(message_id);

            CREATE TABLE IF NOT EXISTS message_map (
                message_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                notification_id TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (message_id, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_message_map_notification
                ON message_map(channel_id, notification_id);
        "#,
    },
    Migration {
        version: 2,
        name: "unlinked_merges",
        sql: r#"
            CREATE TABLE IF NOT EXISTS unlinked_merges (
                confirmation_id TEXT PRIMARY KEY,
                refs TEXT NOT NULL,
                merge_commit_hash TEXT NOT NULL,
                merge_url TEXT NOT NULL,
                merged_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_unlinked_merges_merged ON unlinked_merges(merged_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
