//! Metric names and recording helpers.
//!
//! Everything goes through the `metrics` facade; without an installed
//! recorder the calls are no-ops, so libraries and tests can record freely.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub const JOBS_SUBMITTED: &str = "mediaflow_jobs_submitted_total";
pub const CONVERSIONS_DONE: &str = "worker_conversions_done_total";
pub const CONVERSION_DURATION: &str = "worker_conversion_duration_seconds";
pub const SIZE_REDUCTION: &str = "worker_file_size_reduction_percent";
pub const JOBS_IN_PROGRESS: &str = "worker_jobs_in_progress";
pub const CPU_LOAD: &str = "worker_cpu_load";
pub const MEMORY_USAGE_MB: &str = "worker_memory_usage_mb";
pub const STALE_REQUEUED: &str = "worker_stale_jobs_requeued_total";

/// Terminal outcome label for [`CONVERSIONS_DONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        }
    }
}

pub fn record_submission(format: &str) {
    counter!(JOBS_SUBMITTED, "format" => format.to_string()).increment(1);
}

pub fn record_conversion_failed() {
    counter!(CONVERSIONS_DONE, "status" => Outcome::Failed.as_str()).increment(1);
}

/// Record a successful conversion with its duration and size reduction.
pub fn record_conversion_succeeded(duration: Duration, size_reduction_percent: f64) {
    counter!(CONVERSIONS_DONE, "status" => Outcome::Success.as_str()).increment(1);
    histogram!(CONVERSION_DURATION).record(duration.as_secs_f64());
    histogram!(SIZE_REDUCTION).record(size_reduction_percent);
}

pub fn set_jobs_in_progress(n: u32) {
    gauge!(JOBS_IN_PROGRESS).set(n as f64);
}

/// CPU load as a 0.0–1.0 fraction.
pub fn set_cpu_load(fraction: f64) {
    gauge!(CPU_LOAD).set(fraction);
}

pub fn set_memory_usage_mb(mb: u64) {
    gauge!(MEMORY_USAGE_MB).set(mb as f64);
}

pub fn record_stale_requeued() {
    counter!(STALE_REQUEUED).increment(1);
}
