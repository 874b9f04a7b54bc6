//! Least-loaded worker selection.
//!
//! The selector is a pure function over telemetry snapshots. Snapshots that
//! are not fresh mean "load unknown" and are never treated as idle, so a
//! worker that stopped publishing cannot attract new jobs.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mf_core::WorkerId;
use mf_db::models::TelemetrySnapshot;

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Suggest this worker; the job also goes to the fallback queue.
    Worker(WorkerId),
    /// No fresh telemetry: fallback queue only, no advisory worker.
    FallbackOnly,
}

impl Selection {
    pub fn worker(&self) -> Option<&WorkerId> {
        match self {
            Selection::Worker(w) => Some(w),
            Selection::FallbackOnly => None,
        }
    }

    pub fn into_worker(self) -> Option<WorkerId> {
        match self {
            Selection::Worker(w) => Some(w),
            Selection::FallbackOnly => None,
        }
    }
}

/// Order by active jobs, then load score, then worker id for determinism.
fn by_load(a: &TelemetrySnapshot, b: &TelemetrySnapshot) -> Ordering {
    a.active_job_count
        .cmp(&b.active_job_count)
        .then_with(|| a.load_score.total_cmp(&b.load_score))
        .then_with(|| a.worker_id.cmp(&b.worker_id))
}

/// Pick the worker that should receive the next job.
///
/// Discards snapshots that are not fresh at `now` under `ttl`, then takes
/// the minimum by `(active_job_count, load_score)`.
pub fn select_worker<'a>(
    snapshots: impl IntoIterator<Item = &'a TelemetrySnapshot>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Selection {
    snapshots
        .into_iter()
        .filter(|s| s.is_fresh(now, ttl))
        .min_by(|a, b| by_load(a, b))
        .map(|s| Selection::Worker(s.worker_id.clone()))
        .unwrap_or(Selection::FallbackOnly)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(15);

    fn snap(id: &str, jobs: u32, load: f64, age_secs: i64, now: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            worker_id: WorkerId::from(id),
            load_score: load,
            active_job_count: jobs,
            success_count: 0,
            failure_count: 0,
            updated_at: now - chrono::Duration::seconds(age_secs),
            ttl_secs: TTL.as_secs(),
        }
    }

    #[test]
    fn fewer_active_jobs_beats_lower_cpu() {
        let now = Utc::now();
        let snaps = [snap("A", 2, 10.0, 1, now), snap("B", 0, 90.0, 1, now)];
        assert_eq!(
            select_worker(&snaps, now, TTL),
            Selection::Worker(WorkerId::from("B"))
        );
    }

    #[test]
    fn load_breaks_ties_on_jobs() {
        let now = Utc::now();
        let snaps = [snap("A", 1, 70.0, 1, now), snap("B", 1, 20.0, 1, now)];
        assert_eq!(select_worker(&snaps, now, TTL).worker().map(|w| w.as_str()), Some("B"));
    }

    #[test]
    fn stale_snapshot_excluded_even_if_least_loaded() {
        let now = Utc::now();
        let snaps = [snap("idle-but-stale", 0, 0.0, 60, now), snap("busy", 3, 95.0, 2, now)];
        assert_eq!(select_worker(&snaps, now, TTL).worker().map(|w| w.as_str()), Some("busy"));
    }

    #[test]
    fn no_fresh_snapshot_means_fallback_only() {
        let now = Utc::now();
        let snaps = [snap("A", 0, 0.0, 30, now)];
        assert_eq!(select_worker(&snaps, now, TTL), Selection::FallbackOnly);
        assert_eq!(select_worker([], now, TTL), Selection::FallbackOnly);
    }

    #[test]
    fn identical_load_is_deterministic() {
        let now = Utc::now();
        let snaps = [snap("w2", 0, 5.0, 1, now), snap("w1", 0, 5.0, 1, now)];
        assert_eq!(select_worker(&snaps, now, TTL).into_worker(), Some(WorkerId::from("w1")));
    }
}
