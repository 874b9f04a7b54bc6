//! Worker telemetry snapshots.
//!
//! One row per worker, overwritten on every publish. Rows carry their own
//! expiry; readers treat expired rows as absent.

use chrono::{DateTime, Utc};
use mf_core::{Error, Result, WorkerId};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{format_ts, TelemetrySnapshot};

const COLS: &str = "worker_id, load_score, active_job_count, success_count, failure_count,
    updated_at, expires_at";

/// Insert or overwrite the snapshot for `snap.worker_id`.
pub fn upsert_snapshot(conn: &Connection, snap: &TelemetrySnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO worker_telemetry
            (worker_id, load_score, active_job_count, success_count, failure_count,
             updated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(worker_id) DO UPDATE SET
            load_score = excluded.load_score,
            active_job_count = excluded.active_job_count,
            success_count = excluded.success_count,
            failure_count = excluded.failure_count,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at",
        rusqlite::params![
            snap.worker_id.as_str(),
            snap.load_score,
            snap.active_job_count as i64,
            snap.success_count as i64,
            snap.failure_count as i64,
            format_ts(snap.updated_at),
            format_ts(snap.expires_at()),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Latest snapshot for one worker, expired or not.
pub fn get_snapshot(conn: &Connection, worker: &WorkerId) -> Result<Option<TelemetrySnapshot>> {
    let q = format!("SELECT {COLS} FROM worker_telemetry WHERE worker_id = ?1");
    conn.query_row(&q, [worker.as_str()], TelemetrySnapshot::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Every stored snapshot, ordered by worker id.
pub fn list_snapshots(conn: &Connection) -> Result<Vec<TelemetrySnapshot>> {
    let q = format!("SELECT {COLS} FROM worker_telemetry ORDER BY worker_id");
    query_snapshots(conn, &q, rusqlite::params![])
}

/// Snapshots that have not yet expired at `now`, ordered by worker id.
pub fn list_live_snapshots(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TelemetrySnapshot>> {
    let q = format!(
        "SELECT {COLS} FROM worker_telemetry WHERE expires_at > ?1 ORDER BY worker_id"
    );
    query_snapshots(conn, &q, rusqlite::params![format_ts(now)])
}

/// Delete snapshots that expired before `now`. Returns the number removed.
pub fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM worker_telemetry WHERE expires_at <= ?1",
        [format_ts(now)],
    )
    .map_err(|e| Error::database(e.to_string()))
}

fn query_snapshots(
    conn: &Connection,
    q: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<TelemetrySnapshot>> {
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params, TelemetrySnapshot::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    fn snap(id: &str, age_secs: i64, ttl_secs: u64) -> TelemetrySnapshot {
        // Whole milliseconds so the stored form round-trips exactly.
        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap();
        TelemetrySnapshot {
            worker_id: WorkerId::from(id),
            load_score: 42.5,
            active_job_count: 1,
            success_count: 3,
            failure_count: 1,
            updated_at: now - chrono::Duration::seconds(age_secs),
            ttl_secs,
        }
    }

    #[test]
    fn upsert_overwrites() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let first = snap("w1", 0, 15);
        upsert_snapshot(&conn, &first).unwrap();

        let mut second = first.clone();
        second.active_job_count = 0;
        second.success_count = 4;
        upsert_snapshot(&conn, &second).unwrap();

        let stored = get_snapshot(&conn, &WorkerId::from("w1")).unwrap().unwrap();
        assert_eq!(stored, second);
        assert_eq!(list_snapshots(&conn).unwrap().len(), 1);
    }

    #[test]
    fn expired_rows_are_hidden_and_purged() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        upsert_snapshot(&conn, &snap("fresh", 1, 15)).unwrap();
        upsert_snapshot(&conn, &snap("stale", 30, 15)).unwrap();

        let now = Utc::now();
        let live = list_live_snapshots(&conn, now).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].worker_id.as_str(), "fresh");
        assert_eq!(list_snapshots(&conn).unwrap().len(), 2);

        assert_eq!(purge_expired(&conn, now).unwrap(), 1);
        assert!(get_snapshot(&conn, &WorkerId::from("stale")).unwrap().is_none());
    }
}
