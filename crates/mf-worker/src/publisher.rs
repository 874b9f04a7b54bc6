//! Periodic telemetry publication.
//!
//! Runs on its own timer, independent of job processing, so a worker busy
//! with a long conversion still reports itself as alive and loaded. When the
//! worker stops, its last snapshot simply ages out.

use chrono::{DateTime, Utc};
use mf_core::events::EventPayload;
use mf_core::Result;
use mf_db::models::TelemetrySnapshot;
use mf_db::pool::get_conn;
use mf_db::queries::telemetry;
use sysinfo::System;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::context::WorkerContext;

/// One host load reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    /// Global CPU usage, 0–100.
    pub cpu_percent: f64,
    pub used_memory_mb: u64,
}

/// CPU and memory sampler.
///
/// CPU usage is computed between consecutive refreshes, so the very first
/// sample after construction reads as zero.
pub struct HostSampler {
    sys: System,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }

    pub fn sample(&mut self) -> HostSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        let cpu = self.sys.global_cpu_usage() as f64;
        HostSample {
            cpu_percent: if cpu.is_finite() { cpu.clamp(0.0, 100.0) } else { 0.0 },
            used_memory_mb: self.sys.used_memory() / 1024 / 1024,
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of `ctx`'s counters with the given CPU load.
pub fn build_snapshot(ctx: &WorkerContext, cpu_percent: f64, now: DateTime<Utc>) -> TelemetrySnapshot {
    TelemetrySnapshot {
        worker_id: ctx.worker_id.clone(),
        load_score: (cpu_percent * 100.0).round() / 100.0,
        active_job_count: ctx.counters.active(),
        success_count: ctx.counters.success(),
        failure_count: ctx.counters.failure(),
        updated_at: now,
        ttl_secs: ctx.config.telemetry.ttl_secs,
    }
}

/// Write one snapshot to the shared store.
pub fn publish(ctx: &WorkerContext, sample: HostSample) -> Result<TelemetrySnapshot> {
    mf_core::metrics::set_cpu_load(sample.cpu_percent / 100.0);
    mf_core::metrics::set_memory_usage_mb(sample.used_memory_mb);

    let snap = build_snapshot(ctx, sample.cpu_percent, Utc::now());
    let conn = get_conn(&ctx.db)?;
    telemetry::upsert_snapshot(&conn, &snap)?;

    ctx.event_bus.broadcast(EventPayload::TelemetryPublished {
        worker_id: snap.worker_id.clone(),
        load_score: snap.load_score,
        active_job_count: snap.active_job_count,
    });
    tracing::trace!(
        worker_id = %snap.worker_id,
        load = snap.load_score,
        active = snap.active_job_count,
        "Published telemetry"
    );
    Ok(snap)
}

/// Publish every `telemetry.interval` until cancelled.
pub async fn run_publisher(ctx: WorkerContext, cancel: CancellationToken) {
    tracing::info!(worker_id = %ctx.worker_id, "Telemetry publisher started");

    let mut sampler = HostSampler::new();
    let mut ticker = tokio::time::interval(ctx.config.telemetry.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }

        if let Err(e) = publish(&ctx, sampler.sample()) {
            tracing::warn!(worker_id = %ctx.worker_id, "Telemetry publish failed: {e}");
        }
    }

    tracing::info!(worker_id = %ctx.worker_id, "Telemetry publisher stopped");
}
