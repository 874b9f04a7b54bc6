//! Derived load score and human-readable load labels.

use std::fmt;

use chrono::{DateTime, Utc};
use mf_db::models::TelemetrySnapshot;
use serde::Serialize;
use std::time::Duration;

/// Points added to the CPU score per in-flight job.
pub const ACTIVE_JOB_WEIGHT: f64 = 20.0;

/// Blend CPU load with in-flight jobs into a single 0–100 score.
pub fn derived_load_score(snap: &TelemetrySnapshot) -> f64 {
    let score = snap.load_score + ACTIVE_JOB_WEIGHT * snap.active_job_count as f64;
    let score = score.clamp(0.0, 100.0);
    (score * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLabel {
    Idle,
    Available,
    Busy,
    /// The snapshot is no longer fresh.
    Unknown,
}

impl LoadLabel {
    /// `idle` below 30, `available` from 30 to 60, `busy` above 60.
    pub fn from_score(score: f64) -> Self {
        if score < 30.0 {
            LoadLabel::Idle
        } else if score <= 60.0 {
            LoadLabel::Available
        } else {
            LoadLabel::Busy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadLabel::Idle => "idle",
            LoadLabel::Available => "available",
            LoadLabel::Busy => "busy",
            LoadLabel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LoadLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the worker stats projection.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    #[serde(flatten)]
    pub snapshot: TelemetrySnapshot,
    pub derived_load_score: f64,
    pub label: LoadLabel,
    pub fresh: bool,
}

impl WorkerStats {
    pub fn from_snapshot(snapshot: TelemetrySnapshot, now: DateTime<Utc>, ttl: Duration) -> Self {
        let fresh = snapshot.is_fresh(now, ttl);
        let derived_load_score = derived_load_score(&snapshot);
        let label = if fresh {
            LoadLabel::from_score(derived_load_score)
        } else {
            LoadLabel::Unknown
        };
        Self {
            snapshot,
            derived_load_score,
            label,
            fresh,
        }
    }
}
