//! The conversion pipeline for one claimed job.
//!
//! Steps and the progress recorded after each:
//!
//! | step                               | progress |
//! |------------------------------------|----------|
//! | claim acquired                     | 10       |
//! | input fetched into the workspace   | 30       |
//! | transcoder about to run            | 50       |
//! | transcoder finished                | 80       |
//! | output uploaded, job completed     | 100      |
//!
//! Any failure ends the job in `failed` with the error text recorded. The
//! scratch [`Workspace`] is dropped on every path. A lost claim aborts the
//! pipeline without touching the job record.

use std::time::Instant;

use mf_av::{transcode, TranscodeRequest, Workspace};
use mf_blob::BlobKey;
use mf_core::events::EventPayload;
use mf_core::{Error, MediaKind, Result};
use mf_db::pool::get_conn;
use mf_db::queries::jobs::{self, Claim, Completion};
use tokio::io::AsyncWriteExt;

use crate::context::WorkerContext;

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output_key: String },
    Failed { error: String },
    /// Another worker took over the claim; nothing was recorded.
    ClaimLost,
}

/// Result metrics gathered during a successful run.
#[derive(Debug, Clone)]
struct Converted {
    output_key: BlobKey,
    input_size: u64,
    output_size: u64,
}

/// Percentage saved relative to the input, rounded to 2 dp; 0 for an empty
/// input.
pub fn size_reduction_percent(input_size: u64, output_size: u64) -> f64 {
    if input_size == 0 {
        return 0.0;
    }
    let pct = (input_size as f64 - output_size as f64) / input_size as f64 * 100.0;
    round2(pct)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Key of the converted output: `outputs/<job_id>/<stem>_converted.<fmt>`
/// in the input's owner namespace.
pub fn output_key_for(input: &BlobKey, claim: &Claim) -> Result<BlobKey> {
    let job = &claim.job;
    input.sibling(format!(
        "outputs/{}/{}_converted.{}",
        job.job_id,
        input.stem(),
        job.output_format.extension()
    ))
}

/// Run the pipeline for `claim` and record the terminal state.
///
/// Only database errors while recording the outcome are returned; every
/// execution failure is persisted into the job instead.
pub async fn execute(ctx: &WorkerContext, claim: Claim) -> Result<JobOutcome> {
    let job_id = claim.job_id();
    let _active = ctx.counters.begin();
    let started = Instant::now();

    ctx.event_bus.broadcast(EventPayload::JobClaimed {
        job_id,
        worker_id: ctx.worker_id.clone(),
    });
    ctx.event_bus.broadcast(EventPayload::JobProgress {
        job_id,
        progress: claim.job.progress,
    });

    match convert(ctx, &claim).await {
        Ok(done) => {
            let duration = started.elapsed();
            let reduction = size_reduction_percent(done.input_size, done.output_size);
            let output_key = done.output_key.to_string();
            let completion = Completion {
                output_key: &output_key,
                input_size_bytes: done.input_size as i64,
                output_size_bytes: done.output_size as i64,
                size_reduction_percent: reduction,
                duration_seconds: round2(duration.as_secs_f64()),
            };

            let conn = get_conn(&ctx.db)?;
            if !jobs::complete_job(&conn, &claim, &completion)? {
                tracing::warn!(job_id = %job_id, "Claim lost before completion could be recorded");
                return Ok(JobOutcome::ClaimLost);
            }
            drop(conn);

            ctx.counters.record_success();
            mf_core::metrics::record_conversion_succeeded(duration, reduction);
            ctx.event_bus.broadcast(EventPayload::JobProgress {
                job_id,
                progress: 100,
            });
            ctx.event_bus.broadcast(EventPayload::JobCompleted {
                job_id,
                output_key: output_key.clone(),
            });
            tracing::info!(
                job_id = %job_id,
                output = %output_key,
                duration_secs = completion.duration_seconds,
                size_reduction_percent = reduction,
                "Conversion completed"
            );
            Ok(JobOutcome::Completed { output_key })
        }
        Err(Error::ClaimLost { .. }) => {
            tracing::warn!(job_id = %job_id, "Claim lost mid-flight; abandoning job");
            Ok(JobOutcome::ClaimLost)
        }
        Err(e) => {
            let error = e.to_string();
            tracing::error!(job_id = %job_id, error = %error, "Conversion failed");

            let conn = get_conn(&ctx.db)?;
            if !jobs::fail_job(&conn, &claim, &error)? {
                tracing::warn!(job_id = %job_id, "Claim lost before failure could be recorded");
                return Ok(JobOutcome::ClaimLost);
            }
            drop(conn);

            ctx.counters.record_failure();
            mf_core::metrics::record_conversion_failed();
            ctx.event_bus.broadcast(EventPayload::JobFailed {
                job_id,
                error: error.clone(),
            });
            Ok(JobOutcome::Failed { error })
        }
    }
}

/// Raise progress, failing with [`Error::ClaimLost`] if the claim is gone.
///
/// The broadcast carries the stored value, which stays ahead of `progress`
/// when a previous holder of a taken-over job got further.
fn set_progress(ctx: &WorkerContext, claim: &Claim, progress: u8) -> Result<()> {
    let conn = get_conn(&ctx.db)?;
    let Some(stored) = jobs::update_progress(&conn, claim, progress)? else {
        return Err(Error::claim_lost(claim.job_id()));
    };
    ctx.event_bus.broadcast(EventPayload::JobProgress {
        job_id: claim.job_id(),
        progress: stored,
    });
    Ok(())
}

/// Copy the input blob into `ws`, returning its size.
async fn fetch(ctx: &WorkerContext, key: &BlobKey, ws: &Workspace) -> Result<u64> {
    let mut reader = ctx.blob.get(key).await.map_err(|e| match e {
        Error::NotFound { .. } => Error::Fetch(format!("input {key} does not exist")),
        other => Error::Fetch(format!("cannot open input {key}: {other}")),
    })?;

    let mut file = tokio::fs::File::create(ws.input())
        .await
        .map_err(|e| Error::Fetch(format!("cannot create scratch file: {e}")))?;
    let size = tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| Error::Fetch(format!("reading input {key}: {e}")))?;
    file.flush()
        .await
        .map_err(|e| Error::Fetch(format!("writing scratch file: {e}")))?;
    Ok(size)
}

async fn convert(ctx: &WorkerContext, claim: &Claim) -> Result<Converted> {
    let job = &claim.job;
    let input = BlobKey::new(job.owner.as_str(), job.input_key.as_str())
        .map_err(|e| Error::Fetch(e.to_string()))?;

    let ws = Workspace::new(
        ctx.config.worker.scratch_dir.as_deref(),
        job.job_id,
        input.extension().as_deref(),
        job.output_format,
    )
    .map_err(|e| Error::Fetch(format!("cannot prepare scratch space: {e}")))?;

    tracing::debug!(job_id = %job.job_id, input = %input, dir = %ws.dir().display(), "Fetching input");
    let input_size = fetch(ctx, &input, &ws).await?;
    set_progress(ctx, claim, 30)?;

    set_progress(ctx, claim, 50)?;
    let request = TranscodeRequest {
        input: ws.input(),
        output: ws.output(),
        input_kind: MediaKind::detect(input.file_name()),
        format: job.output_format,
        options: &job.options,
    };
    tracing::debug!(job_id = %job.job_id, format = %job.output_format, "Running transcoder");
    transcode(&ctx.tools, &request, ctx.config.worker.job_timeout()).await?;

    let output = tokio::fs::File::open(ws.output())
        .await
        .map_err(|e| Error::Transcode(format!("transcoder produced no output: {e}")))?;
    set_progress(ctx, claim, 80)?;

    let output_key = output_key_for(&input, claim).map_err(|e| Error::Upload(e.to_string()))?;
    let stored = ctx
        .blob
        .put_stream(&output_key, Box::pin(output), &job.output_format.content_type())
        .await
        .map_err(|e| Error::Upload(format!("storing {output_key}: {e}")))?;
    let output_size = stored.size;

    Ok(Converted {
        output_key,
        input_size,
        output_size,
    })
}
