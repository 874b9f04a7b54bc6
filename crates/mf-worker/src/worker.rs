//! The worker execution loop and the stale-claim sweeper.
//!
//! Each iteration pops the worker's own queue with a short timeout, then the
//! shared fallback queue with a longer one, claims the popped job, and runs
//! it to a terminal state. One job at a time; telemetry is published by a
//! separate task.

use mf_core::events::EventPayload;
use mf_core::{JobId, Result};
use mf_db::pool::get_conn;
use mf_db::queries::jobs::{self, Claim};
use mf_db::queries::{queues, telemetry};
use tokio_util::sync::CancellationToken;

use crate::context::WorkerContext;
use crate::dispatch::pop_blocking;
use crate::pipeline::{self, JobOutcome};

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Both queues were empty for their whole timeout.
    Idle,
    /// A job id was popped but the claim went elsewhere.
    Discarded(JobId),
    /// A job was claimed and ran to the given outcome.
    Executed(JobId, JobOutcome),
}

/// Claim `job_id` for this worker.
///
/// A pending job is claimed normally. A `processing` job whose holder has
/// been silent past the stale threshold is taken over. Anything else (done,
/// held by a live worker, unknown id) yields `None`.
pub fn try_claim(ctx: &WorkerContext, job_id: JobId) -> Result<Option<Claim>> {
    let conn = get_conn(&ctx.db)?;
    if let Some(claim) = jobs::claim_job(&conn, job_id, &ctx.worker_id)? {
        return Ok(Some(claim));
    }
    let claim = jobs::reclaim_stale_job(
        &conn,
        job_id,
        &ctx.worker_id,
        ctx.config.worker.stale_claim_after(),
    )?;
    if claim.is_some() {
        tracing::warn!(job_id = %job_id, worker_id = %ctx.worker_id, "Re-claimed stale job");
    }
    Ok(claim)
}

/// Run one iteration of the loop.
pub async fn poll_once(ctx: &WorkerContext, cancel: &CancellationToken) -> Result<PollOutcome> {
    let wc = &ctx.config.worker;
    let own_queue = queues::worker_queue(&ctx.worker_id);

    let mut popped = pop_blocking(
        &ctx.db,
        &own_queue,
        wc.own_queue_timeout(),
        wc.poll_interval(),
        cancel,
    )
    .await?;
    if popped.is_none() && !cancel.is_cancelled() {
        popped = pop_blocking(
            &ctx.db,
            queues::FALLBACK_QUEUE,
            wc.fallback_queue_timeout(),
            wc.poll_interval(),
            cancel,
        )
        .await?;
    }

    let Some(job_id) = popped else {
        return Ok(PollOutcome::Idle);
    };

    let Some(claim) = try_claim(ctx, job_id)? else {
        tracing::debug!(job_id = %job_id, "Claim lost; discarding queue entry");
        return Ok(PollOutcome::Discarded(job_id));
    };

    tracing::info!(
        job_id = %job_id,
        worker_id = %ctx.worker_id,
        format = %claim.job.output_format,
        "Processing job"
    );
    let outcome = pipeline::execute(ctx, claim).await?;
    Ok(PollOutcome::Executed(job_id, outcome))
}

/// Run the execution loop until cancelled.
///
/// Errors never end the loop; they are logged and followed by a backoff.
pub async fn run_worker_loop(ctx: WorkerContext, cancel: CancellationToken) {
    tracing::info!(worker_id = %ctx.worker_id, "Worker loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match poll_once(&ctx, &cancel).await {
            Ok(PollOutcome::Idle) => tracing::trace!("No jobs available"),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(worker_id = %ctx.worker_id, "Worker loop error: {e}");
                tokio::select! {
                    _ = tokio::time::sleep(ctx.config.worker.error_backoff()) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }

    tracing::info!(worker_id = %ctx.worker_id, "Worker loop stopped");
}

/// Periodic queue maintenance. Returns the number of jobs pushed back onto
/// the fallback queue.
///
/// - Queue entries whose job has finished or vanished are deleted, so the
///   own queues of departed workers do not grow without bound.
/// - Stale `processing` jobs are requeued for takeover.
/// - `pending` jobs that no queue will deliver any more are requeued.
/// - Expired telemetry snapshots are purged.
///
/// A job already waiting on the fallback queue is not pushed again.
pub fn sweep_once(ctx: &WorkerContext) -> Result<usize> {
    let conn = get_conn(&ctx.db)?;

    let dropped = queues::purge_settled(&conn)?;
    if dropped > 0 {
        tracing::debug!(dropped, "Dropped queue entries of finished jobs");
    }

    let mut requeued = 0;
    for job_id in jobs::find_stale_jobs(&conn, ctx.config.worker.stale_claim_after())? {
        if queues::contains(&conn, queues::FALLBACK_QUEUE, job_id)? {
            continue;
        }
        queues::push(&conn, queues::FALLBACK_QUEUE, job_id)?;
        requeued += 1;
        mf_core::metrics::record_stale_requeued();
        ctx.event_bus
            .broadcast(EventPayload::StaleJobRequeued { job_id });
        tracing::warn!(job_id = %job_id, "Requeued stale processing job");
    }

    for job_id in jobs::find_orphaned_pending(&conn, ctx.config.worker.orphan_pending_after())? {
        queues::push(&conn, queues::FALLBACK_QUEUE, job_id)?;
        requeued += 1;
        tracing::warn!(job_id = %job_id, "Requeued undelivered pending job");
    }

    let purged = telemetry::purge_expired(&conn, chrono::Utc::now())?;
    if purged > 0 {
        tracing::debug!(purged, "Purged expired telemetry snapshots");
    }

    Ok(requeued)
}

/// Sweep every `worker.sweep_interval` until cancelled.
pub async fn run_sweeper(ctx: WorkerContext, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.config.worker.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        if let Err(e) = sweep_once(&ctx) {
            tracing::warn!(worker_id = %ctx.worker_id, "Queue sweep failed: {e}");
        }
    }
}
