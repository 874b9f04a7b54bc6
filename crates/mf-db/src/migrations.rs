//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use mf_core::{Error, Result};
use rusqlite::Connection;

/// V1: job records, dispatch queues, telemetry snapshots.
const V1_INITIAL: &str = r#"
-- Conversion jobs; the single source of truth for job status.
CREATE TABLE jobs (
    id                     TEXT PRIMARY KEY,
    status                 TEXT NOT NULL DEFAULT 'pending',
    owner                  TEXT NOT NULL,
    input_key              TEXT NOT NULL,
    output_format          TEXT NOT NULL,
    options                TEXT NOT NULL DEFAULT '{}',
    assigned_worker        TEXT,
    worker_id              TEXT,
    claim_token            TEXT,
    output_key             TEXT,
    progress               INTEGER NOT NULL DEFAULT 0,
    error                  TEXT,
    input_size_bytes       INTEGER,
    output_size_bytes      INTEGER,
    size_reduction_percent REAL,
    duration_seconds       REAL,
    created_at             TEXT NOT NULL,
    started_at             TEXT,
    completed_at           TEXT,
    updated_at             TEXT NOT NULL
);

-- Delivery channels; entries carry only a job id.
CREATE TABLE dispatch_queue (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    queue       TEXT NOT NULL,
    job_id      TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

-- Latest self-reported load per worker.
CREATE TABLE worker_telemetry (
    worker_id        TEXT PRIMARY KEY,
    load_score       REAL NOT NULL,
    active_job_count INTEGER NOT NULL,
    success_count    INTEGER NOT NULL,
    failure_count    INTEGER NOT NULL,
    updated_at       TEXT NOT NULL,
    expires_at       TEXT NOT NULL
);

CREATE INDEX idx_jobs_status_created ON jobs(status, created_at);
CREATE INDEX idx_jobs_created        ON jobs(created_at);
CREATE INDEX idx_dispatch_queue      ON dispatch_queue(queue, seq);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        tracing::debug!("Applied migration V{version}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn test_all_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for t in ["jobs", "dispatch_queue", "worker_telemetry", "schema_migrations"] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                    [t],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "table {t} should exist");
        }
    }
}
