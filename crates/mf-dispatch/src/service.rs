//! Job submission and read-only projections.
//!
//! [`JobService`] is what an HTTP layer (or the CLI) calls. Submission
//! writes the job record and both queue entries in one transaction, so a
//! worker can never pop an id whose record does not exist yet.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mf_blob::{BlobKey, BlobStore};
use mf_core::events::{EventBus, EventPayload};
use mf_core::{ConversionOptions, Error, JobId, OutputFormat, Result, WorkerId};
use mf_db::models::{Job, JobStatus};
use mf_db::pool::{get_conn, DbPool};
use mf_db::queries::jobs::{self, NewJob, StatusCounts};
use mf_db::queries::{queues, telemetry};
use serde::{Deserialize, Serialize};

use crate::load::WorkerStats;
use crate::selector::{select_worker, Selection};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 1000;

/// Input of [`JobService::submit`].
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    /// Namespace the input lives in and the output is written to.
    pub owner: String,
    /// Path of the input inside the owner namespace.
    pub input_key: String,
    pub output_format: String,
    #[serde(default)]
    pub options: ConversionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub assigned_worker: Option<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueLength {
    pub queue: String,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Entries waiting on the shared fallback queue.
    pub queue_length: u64,
    /// Every non-empty queue, worker queues included.
    pub queues: Vec<QueueLength>,
    /// Entries across all queues; a job can be waiting on two at once.
    pub total_queued: u64,
    pub counts: StatusCounts,
    pub total_jobs: u64,
}

pub struct JobService {
    db: DbPool,
    blob: Arc<dyn BlobStore>,
    events: Arc<EventBus>,
    telemetry_ttl: Duration,
}

impl JobService {
    pub fn new(
        db: DbPool,
        blob: Arc<dyn BlobStore>,
        events: Arc<EventBus>,
        telemetry_ttl: Duration,
    ) -> Self {
        Self {
            db,
            blob,
            events,
            telemetry_ttl,
        }
    }

    /// Validate, record, and enqueue a new conversion job.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedFormat`] when the format is not allowed.
    /// - [`Error::Validation`] when the input key is malformed.
    /// - [`Error::NotFound`] when the input blob does not exist.
    ///
    /// No job record exists after any of these.
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitResponse> {
        let format: OutputFormat = req.output_format.parse()?;
        let input = BlobKey::new(req.owner.as_str(), req.input_key.as_str())?;

        if self.blob.probe(&input).await?.is_none() {
            return Err(Error::not_found("input", &input));
        }

        let conn = get_conn(&self.db)?;
        let now = Utc::now();
        let snapshots = telemetry::list_live_snapshots(&conn, now)?;
        let selection = select_worker(&snapshots, now, self.telemetry_ttl);
        if selection == Selection::FallbackOnly {
            tracing::debug!("No fresh worker telemetry; using fallback queue only");
        }
        let assigned = selection.into_worker();

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;
        let job = jobs::create_job(
            &tx,
            &NewJob {
                owner: input.owner(),
                input_key: input.path(),
                output_format: format,
                options: &req.options,
                assigned_worker: assigned.as_ref(),
            },
        )?;
        if let Some(ref w) = assigned {
            queues::push(&tx, &queues::worker_queue(w), job.job_id)?;
        }
        queues::push(&tx, queues::FALLBACK_QUEUE, job.job_id)?;
        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        mf_core::metrics::record_submission(format.extension());
        self.events.broadcast(EventPayload::JobQueued {
            job_id: job.job_id,
            assigned_worker: assigned.clone(),
        });
        tracing::info!(
            job_id = %job.job_id,
            input = %input,
            format = %format,
            assigned_worker = assigned.as_ref().map(|w| w.as_str()).unwrap_or("-"),
            "Job submitted"
        );

        Ok(SubmitResponse {
            job_id: job.job_id,
            status: job.status,
            assigned_worker: assigned,
        })
    }

    /// Full job record, or [`Error::NotFound`].
    pub fn get_status(&self, job_id: JobId) -> Result<Job> {
        let conn = get_conn(&self.db)?;
        jobs::require_job(&conn, job_id)
    }

    /// Jobs newest first, optionally filtered by status.
    ///
    /// `limit` defaults to 50 and is clamped to 1..=1000.
    pub fn list(&self, status: Option<JobStatus>, limit: Option<i64>, offset: i64) -> Result<Vec<Job>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let conn = get_conn(&self.db)?;
        jobs::list_jobs(&conn, status, offset.max(0), limit)
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        let conn = get_conn(&self.db)?;
        let counts = jobs::count_by_status(&conn)?;
        let queue_length = queues::len(&conn, queues::FALLBACK_QUEUE)?;
        let total_queued = queues::total_len(&conn)?;
        let queues = queues::queue_lengths(&conn)?
            .into_iter()
            .map(|(queue, length)| QueueLength { queue, length })
            .collect();

        Ok(QueueStats {
            queue_length,
            queues,
            total_queued,
            counts,
            total_jobs: counts.total(),
        })
    }

    /// Every stored snapshot with its derived score and label.
    pub fn worker_stats(&self) -> Result<Vec<WorkerStats>> {
        let conn = get_conn(&self.db)?;
        let now = Utc::now();
        Ok(telemetry::list_snapshots(&conn)?
            .into_iter()
            .map(|s| WorkerStats::from_snapshot(s, now, self.telemetry_ttl))
            .collect())
    }
}
