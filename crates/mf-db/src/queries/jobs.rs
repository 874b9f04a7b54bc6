//! Job record operations.
//!
//! The claim is the only way a job leaves `pending`. Every later write by a
//! worker is fenced on the claim token it received, so a worker whose claim
//! was superseded (stale re-claim) can no longer touch the record.

use std::time::Duration;

use chrono::Utc;
use mf_core::{ClaimToken, ConversionOptions, Error, JobId, OutputFormat, Result, WorkerId};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::models::{now_ts, parse_id, ts_before, Job, JobStatus};
use crate::queries::queues::FALLBACK_QUEUE;

pub const COLS: &str = "id, status, owner, input_key, output_format, options,
    assigned_worker, worker_id, claim_token, output_key, progress, error,
    input_size_bytes, output_size_bytes, size_reduction_percent, duration_seconds,
    created_at, started_at, completed_at, updated_at";

/// Fields supplied by the submission path.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub owner: &'a str,
    pub input_key: &'a str,
    pub output_format: OutputFormat,
    pub options: &'a ConversionOptions,
    pub assigned_worker: Option<&'a WorkerId>,
}

/// Proof of a successful claim; required for every subsequent write.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job: Job,
    pub token: ClaimToken,
    pub worker_id: WorkerId,
    /// True when the job was taken over from a stale holder.
    pub reclaimed: bool,
}

impl Claim {
    pub fn job_id(&self) -> JobId {
        self.job.job_id
    }
}

/// Result metrics recorded on completion.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub output_key: &'a str,
    pub input_size_bytes: i64,
    pub output_size_bytes: i64,
    pub size_reduction_percent: f64,
    pub duration_seconds: f64,
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

/// Create a new job in `pending`.
pub fn create_job(conn: &Connection, new: &NewJob<'_>) -> Result<Job> {
    let id = JobId::new();
    let now = now_ts();
    let options = serde_json::to_string(new.options)
        .map_err(|e| Error::Validation(format!("options are not serializable: {e}")))?;

    let q = format!(
        "INSERT INTO jobs (id, status, owner, input_key, output_format, options,
            assigned_worker, progress, created_at, updated_at)
         VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
         RETURNING {COLS}"
    );

    conn.query_row(
        &q,
        rusqlite::params![
            id.to_string(),
            new.owner,
            new.input_key,
            new.output_format.extension(),
            options,
            new.assigned_worker.map(|w| w.as_str()),
            &now,
        ],
        Job::from_row,
    )
    .map_err(db_err)
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], Job::from_row)
        .optional()
        .map_err(db_err)
}

/// Get a job by ID or fail with `NotFound`.
pub fn require_job(conn: &Connection, id: JobId) -> Result<Job> {
    get_job(conn, id)?.ok_or_else(|| Error::not_found("job", id))
}

/// Atomically move a job from `expected` to `next`.
///
/// Returns `Ok(false)` when the job is not currently in `expected`. Backward
/// or skipping transitions are rejected before touching the database.
pub fn compare_and_set_status(
    conn: &Connection,
    id: JobId,
    expected: JobStatus,
    next: JobStatus,
) -> Result<bool> {
    if !expected.can_transition_to(next) {
        return Err(Error::Validation(format!(
            "illegal status transition {expected} -> {next}"
        )));
    }

    let now = now_ts();
    let completed_at = next.is_terminal().then_some(now.as_str());
    let n = conn
        .execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2,
                completed_at = COALESCE(?3, completed_at)
             WHERE id = ?4 AND status = ?5",
            rusqlite::params![
                next.as_str(),
                &now,
                completed_at,
                id.to_string(),
                expected.as_str()
            ],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Claim a pending job for `worker`.
///
/// A compare-and-set from `pending` to `processing`; of any number of
/// concurrent callers exactly one receives `Some`. The claim sets progress
/// to 10 and issues a fresh claim token.
pub fn claim_job(conn: &Connection, id: JobId, worker: &WorkerId) -> Result<Option<Claim>> {
    let token = ClaimToken::new();
    let now = now_ts();
    let q = format!(
        "UPDATE jobs SET status = 'processing', worker_id = ?1, claim_token = ?2,
            progress = MAX(progress, 10), started_at = ?3, updated_at = ?3
         WHERE id = ?4 AND status = 'pending'
         RETURNING {COLS}"
    );

    let job = conn
        .query_row(
            &q,
            rusqlite::params![worker.as_str(), token.to_string(), &now, id.to_string()],
            Job::from_row,
        )
        .optional()
        .map_err(db_err)?;

    Ok(job.map(|job| Claim {
        job,
        token,
        worker_id: worker.clone(),
        reclaimed: false,
    }))
}

/// Take over a `processing` job whose holder has not written for
/// `stale_after`.
///
/// Issues a new claim token, which fences off the previous holder. Status
/// and progress are left untouched so both stay monotonic.
pub fn reclaim_stale_job(
    conn: &Connection,
    id: JobId,
    worker: &WorkerId,
    stale_after: Duration,
) -> Result<Option<Claim>> {
    let token = ClaimToken::new();
    let now = Utc::now();
    let cutoff = ts_before(now, stale_after);
    let q = format!(
        "UPDATE jobs SET worker_id = ?1, claim_token = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'processing' AND updated_at < ?5
         RETURNING {COLS}"
    );

    let job = conn
        .query_row(
            &q,
            rusqlite::params![
                worker.as_str(),
                token.to_string(),
                crate::models::format_ts(now),
                id.to_string(),
                cutoff
            ],
            Job::from_row,
        )
        .optional()
        .map_err(db_err)?;

    Ok(job.map(|job| Claim {
        job,
        token,
        worker_id: worker.clone(),
        reclaimed: true,
    }))
}

/// Raise the progress of a claimed job. Never lowers it.
///
/// Returns the stored progress afterwards, which is higher than `progress`
/// when an earlier holder already got further, or `None` if the claim is no
/// longer held.
pub fn update_progress(conn: &Connection, claim: &Claim, progress: u8) -> Result<Option<u8>> {
    let stored: Option<i64> = conn
        .query_row(
            "UPDATE jobs SET progress = MAX(progress, ?1), updated_at = ?2
             WHERE id = ?3 AND claim_token = ?4 AND status = 'processing'
             RETURNING progress",
            rusqlite::params![
                progress.min(100),
                now_ts(),
                claim.job_id().to_string(),
                claim.token.to_string()
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    Ok(stored.map(|p| p.clamp(0, 100) as u8))
}

/// Mark a claimed job as completed with its output reference and metrics.
pub fn complete_job(conn: &Connection, claim: &Claim, done: &Completion<'_>) -> Result<bool> {
    let now = now_ts();
    let n = conn
        .execute(
            "UPDATE jobs SET status = 'completed', progress = 100, output_key = ?1,
                input_size_bytes = ?2, output_size_bytes = ?3,
                size_reduction_percent = ?4, duration_seconds = ?5,
                completed_at = ?6, updated_at = ?6
             WHERE id = ?7 AND claim_token = ?8 AND status = 'processing'",
            rusqlite::params![
                done.output_key,
                done.input_size_bytes,
                done.output_size_bytes,
                done.size_reduction_percent,
                done.duration_seconds,
                &now,
                claim.job_id().to_string(),
                claim.token.to_string()
            ],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Mark a claimed job as failed.
pub fn fail_job(conn: &Connection, claim: &Claim, error: &str) -> Result<bool> {
    let now = now_ts();
    let n = conn
        .execute(
            "UPDATE jobs SET status = 'failed', error = ?1, completed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND claim_token = ?4 AND status = 'processing'",
            rusqlite::params![
                error,
                &now,
                claim.job_id().to_string(),
                claim.token.to_string()
            ],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// List jobs, newest first, with optional status filter and pagination.
pub fn list_jobs(
    conn: &Connection,
    status: Option<JobStatus>,
    offset: i64,
    limit: i64,
) -> Result<Vec<Job>> {
    let (q, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = if let Some(s) = status
    {
        (
            format!(
                "SELECT {COLS} FROM jobs WHERE status = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
            ),
            vec![
                Box::new(s.as_str().to_string()),
                Box::new(limit),
                Box::new(offset),
            ],
        )
    } else {
        (
            format!(
                "SELECT {COLS} FROM jobs
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
            ),
            vec![Box::new(limit), Box::new(offset)],
        )
    };

    let mut stmt = conn.prepare(&q).map_err(db_err)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), Job::from_row)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Count jobs per status in a single pass.
pub fn count_by_status(conn: &Connection) -> Result<StatusCounts> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(db_err)?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let (status, n) = row.map_err(db_err)?;
        let n = n.max(0) as u64;
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Pending) => counts.pending = n,
            Ok(JobStatus::Processing) => counts.processing = n,
            Ok(JobStatus::Completed) => counts.completed = n,
            Ok(JobStatus::Failed) => counts.failed = n,
            Err(_) => tracing::warn!(status = %status, "Ignoring jobs with unknown status"),
        }
    }
    Ok(counts)
}

/// IDs of `processing` jobs whose holder has not written for `stale_after`.
pub fn find_stale_jobs(conn: &Connection, stale_after: Duration) -> Result<Vec<JobId>> {
    let cutoff = ts_before(Utc::now(), stale_after);
    let mut stmt = conn
        .prepare(
            "SELECT id FROM jobs WHERE status = 'processing' AND updated_at < ?1
             ORDER BY updated_at ASC",
        )
        .map_err(db_err)?;
    let ids = stmt
        .query_map([cutoff], |row| parse_id(row, 0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<JobId>, _>>()
        .map_err(db_err)?;
    Ok(ids)
}

/// IDs of `pending` jobs untouched for `older_than` that have no entry on
/// the fallback queue.
///
/// Such a job can only start if some worker still pops it from its own
/// queue; once that entry was consumed without a successful claim, or its
/// worker is gone, nothing will deliver it again.
pub fn find_orphaned_pending(conn: &Connection, older_than: Duration) -> Result<Vec<JobId>> {
    let cutoff = ts_before(Utc::now(), older_than);
    let mut stmt = conn
        .prepare(
            "SELECT id FROM jobs
             WHERE status = 'pending' AND updated_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM dispatch_queue
                   WHERE dispatch_queue.job_id = jobs.id AND dispatch_queue.queue = ?2
               )
             ORDER BY created_at ASC",
        )
        .map_err(db_err)?;
    let ids = stmt
        .query_map(rusqlite::params![cutoff, FALLBACK_QUEUE], |row| parse_id(row, 0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<JobId>, _>>()
        .map_err(db_err)?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    fn new_job<'a>(options: &'a ConversionOptions) -> NewJob<'a> {
        NewJob {
            owner: "alice",
            input_key: "alice/in/song.wav",
            output_format: OutputFormat::Mp3,
            options,
            assigned_worker: None,
        }
    }

    fn backdate(conn: &Connection, id: JobId, secs: i64) {
        let past = crate::models::format_ts(Utc::now() - chrono::Duration::seconds(secs));
        conn.execute(
            "UPDATE jobs SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![past, id.to_string()],
        )
        .unwrap();
    }

    #[test]
    fn create_and_get() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let mut opts = ConversionOptions::new();
        opts.insert("bitrate".into(), serde_json::json!("320k"));
        let worker = WorkerId::from("w1");

        let job = create_job(
            &conn,
            &NewJob {
                assigned_worker: Some(&worker),
                ..new_job(&opts)
            },
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.assigned_worker, Some(worker));

        let found = require_job(&conn, job.job_id).unwrap();
        assert_eq!(found.input_key, "alice/in/song.wav");
        assert_eq!(found.options["bitrate"], "320k");
        assert!(found.output_key.is_none());
    }

    #[test]
    fn require_missing_is_not_found() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let err = require_job(&conn, JobId::new()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn claim_only_once() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let job = create_job(&conn, &new_job(&opts)).unwrap();

        let a = claim_job(&conn, job.job_id, &WorkerId::from("a")).unwrap();
        let b = claim_job(&conn, job.job_id, &WorkerId::from("b")).unwrap();
        let claim = a.expect("first claim wins");
        assert!(b.is_none());
        assert_eq!(claim.job.status, JobStatus::Processing);
        assert_eq!(claim.job.progress, 10);
        assert_eq!(claim.job.worker_id.as_ref().map(|w| w.as_str()), Some("a"));
        assert!(claim.job.started_at.is_some());
    }

    #[test]
    fn claim_unknown_job_is_none() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        assert!(claim_job(&conn, JobId::new(), &WorkerId::from("a"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn progress_never_decreases() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let job = create_job(&conn, &new_job(&opts)).unwrap();
        let claim = claim_job(&conn, job.job_id, &WorkerId::from("a"))
            .unwrap()
            .unwrap();

        assert_eq!(update_progress(&conn, &claim, 50).unwrap(), Some(50));
        assert_eq!(update_progress(&conn, &claim, 30).unwrap(), Some(50));
        assert_eq!(require_job(&conn, job.job_id).unwrap().progress, 50);
    }

    #[test]
    fn complete_records_metrics() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let job = create_job(&conn, &new_job(&opts)).unwrap();
        let claim = claim_job(&conn, job.job_id, &WorkerId::from("a"))
            .unwrap()
            .unwrap();

        let done = Completion {
            output_key: "alice/outputs/x/song_converted.mp3",
            input_size_bytes: 1000,
            output_size_bytes: 250,
            size_reduction_percent: 75.0,
            duration_seconds: 1.25,
        };
        assert!(complete_job(&conn, &claim, &done).unwrap());

        let found = require_job(&conn, job.job_id).unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.progress, 100);
        assert_eq!(found.output_key.as_deref(), Some(done.output_key));
        assert_eq!(found.output_size_bytes, Some(250));
        assert!(found.completed_at.is_some());
        assert!(found.error.is_none());

        // Terminal: neither a second completion nor a failure applies.
        assert!(!complete_job(&conn, &claim, &done).unwrap());
        assert!(!fail_job(&conn, &claim, "late").unwrap());
        assert_eq!(update_progress(&conn, &claim, 100).unwrap(), None);
    }

    #[test]
    fn fail_keeps_output_empty() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let job = create_job(&conn, &new_job(&opts)).unwrap();
        let claim = claim_job(&conn, job.job_id, &WorkerId::from("a"))
            .unwrap()
            .unwrap();

        assert!(fail_job(&conn, &claim, "Transcode error: exit 1").unwrap());
        let found = require_job(&conn, job.job_id).unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert_eq!(found.error.as_deref(), Some("Transcode error: exit 1"));
        assert!(found.output_key.is_none());
    }

    #[test]
    fn compare_and_set_rejects_illegal_transitions() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let job = create_job(&conn, &new_job(&opts)).unwrap();

        let err = compare_and_set_status(&conn, job.job_id, JobStatus::Pending, JobStatus::Completed)
            .unwrap_err();
        assert!(err.is_validation());

        assert!(
            compare_and_set_status(&conn, job.job_id, JobStatus::Pending, JobStatus::Processing)
                .unwrap()
        );
        // Expected status no longer matches.
        assert!(
            !compare_and_set_status(&conn, job.job_id, JobStatus::Pending, JobStatus::Processing)
                .unwrap()
        );
        assert!(
            compare_and_set_status(&conn, job.job_id, JobStatus::Processing, JobStatus::Failed)
                .unwrap()
        );
        let found = require_job(&conn, job.job_id).unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn stale_reclaim_fences_previous_holder() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let job = create_job(&conn, &new_job(&opts)).unwrap();
        let first = claim_job(&conn, job.job_id, &WorkerId::from("a"))
            .unwrap()
            .unwrap();
        assert_eq!(update_progress(&conn, &first, 50).unwrap(), Some(50));

        // Fresh claims cannot be taken over.
        let stale_after = Duration::from_secs(60);
        assert!(reclaim_stale_job(&conn, job.job_id, &WorkerId::from("b"), stale_after)
            .unwrap()
            .is_none());
        assert!(find_stale_jobs(&conn, stale_after).unwrap().is_empty());

        backdate(&conn, job.job_id, 120);
        assert_eq!(find_stale_jobs(&conn, stale_after).unwrap(), vec![job.job_id]);

        let second = reclaim_stale_job(&conn, job.job_id, &WorkerId::from("b"), stale_after)
            .unwrap()
            .expect("stale job is re-claimable");
        assert!(second.reclaimed);
        assert_eq!(second.job.status, JobStatus::Processing);
        assert_eq!(second.job.progress, 50);

        // The old holder is fenced off.
        assert_eq!(update_progress(&conn, &first, 80).unwrap(), None);
        assert!(!fail_job(&conn, &first, "zombie").unwrap());
        assert_eq!(update_progress(&conn, &second, 80).unwrap(), Some(80));
    }

    #[test]
    fn orphaned_pending_needs_age_and_no_fallback_entry() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let queued = create_job(&conn, &new_job(&opts)).unwrap();
        let popped = create_job(&conn, &new_job(&opts)).unwrap();
        let claimed = create_job(&conn, &new_job(&opts)).unwrap();
        crate::queries::queues::push(&conn, FALLBACK_QUEUE, queued.job_id).unwrap();
        claim_job(&conn, claimed.job_id, &WorkerId::from("a")).unwrap();

        let older_than = Duration::from_secs(300);
        assert!(find_orphaned_pending(&conn, older_than).unwrap().is_empty());

        for id in [queued.job_id, popped.job_id, claimed.job_id] {
            backdate(&conn, id, 600);
        }
        assert_eq!(find_orphaned_pending(&conn, older_than).unwrap(), vec![popped.job_id]);
    }

    #[test]
    fn list_newest_first_with_filter() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let first = create_job(&conn, &new_job(&opts)).unwrap();
        let second = create_job(&conn, &new_job(&opts)).unwrap();
        claim_job(&conn, first.job_id, &WorkerId::from("a")).unwrap();

        let all = list_jobs(&conn, None, 0, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].job_id, second.job_id);

        let pending = list_jobs(&conn, Some(JobStatus::Pending), 0, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, second.job_id);

        assert_eq!(list_jobs(&conn, None, 0, 1).unwrap().len(), 1);
    }

    #[test]
    fn counts_sum_to_total() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let opts = ConversionOptions::new();
        let a = create_job(&conn, &new_job(&opts)).unwrap();
        let b = create_job(&conn, &new_job(&opts)).unwrap();
        create_job(&conn, &new_job(&opts)).unwrap();

        let claim_a = claim_job(&conn, a.job_id, &WorkerId::from("w")).unwrap().unwrap();
        fail_job(&conn, &claim_a, "x").unwrap();
        claim_job(&conn, b.job_id, &WorkerId::from("w")).unwrap();

        let counts = count_by_status(&conn).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.get(JobStatus::Failed), 1);
    }
}
