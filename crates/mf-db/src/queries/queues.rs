//! Dispatch queue operations.
//!
//! Queues are named FIFO lists of job ids in the `dispatch_queue` table.
//! Each job is pushed onto its assigned worker's queue and onto the shared
//! fallback queue; the claim on the job record decides who runs it, so a
//! popped id whose job is no longer pending is simply dropped.

use mf_core::{Error, JobId, Result, WorkerId};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::now_ts;

/// Queue drained by every worker.
pub const FALLBACK_QUEUE: &str = "fallback";

/// Name of a worker's own queue.
pub fn worker_queue(worker: &WorkerId) -> String {
    format!("worker:{worker}")
}

/// Append a job id to the tail of `queue`.
pub fn push(conn: &Connection, queue: &str, job_id: JobId) -> Result<()> {
    conn.execute(
        "INSERT INTO dispatch_queue (queue, job_id, enqueued_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![queue, job_id.to_string(), now_ts()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Atomically remove and return the head of `queue`, if any.
///
/// The delete and the read are one statement, so two poppers never receive
/// the same entry.
pub fn try_pop(conn: &Connection, queue: &str) -> Result<Option<JobId>> {
    let raw: Option<String> = conn
        .query_row(
            "DELETE FROM dispatch_queue
             WHERE seq = (SELECT seq FROM dispatch_queue WHERE queue = ?1 ORDER BY seq LIMIT 1)
             RETURNING job_id",
            [queue],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    match raw {
        Some(s) => Uuid::parse_str(&s)
            .map(|u| Some(JobId::from(u)))
            .map_err(|e| Error::database(format!("corrupt queue entry '{s}': {e}"))),
        None => Ok(None),
    }
}

/// Whether `job_id` is currently waiting on `queue`.
pub fn contains(conn: &Connection, queue: &str, job_id: JobId) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dispatch_queue WHERE queue = ?1 AND job_id = ?2)",
        rusqlite::params![queue, job_id.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Number of entries waiting in `queue`.
pub fn len(conn: &Connection, queue: &str) -> Result<u64> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM dispatch_queue WHERE queue = ?1",
            [queue],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n.max(0) as u64)
}

/// Number of entries across all queues.
pub fn total_len(conn: &Connection) -> Result<u64> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM dispatch_queue", [], |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n.max(0) as u64)
}

/// Delete entries whose job has finished or no longer exists, returning
/// how many were removed.
///
/// Entries for processing jobs stay: a stale claim is recovered by pushing
/// its job back onto the fallback queue.
pub fn purge_settled(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM dispatch_queue
         WHERE NOT EXISTS (
             SELECT 1 FROM jobs
             WHERE jobs.id = dispatch_queue.job_id
               AND jobs.status IN ('pending', 'processing')
         )",
        [],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Length of every non-empty queue, ordered by name.
pub fn queue_lengths(conn: &Connection) -> Result<Vec<(String, u64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT queue, COUNT(*) FROM dispatch_queue GROUP BY queue ORDER BY queue",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| Error::database(e.to_string()))?
        .map(|r| r.map(|(q, n)| (q, n.max(0) as u64)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
