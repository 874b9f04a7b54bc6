//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`, and serializes to the flat JSON record exposed by the
//! job API.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use mf_core::{ClaimToken, ConversionOptions, Error, JobId, OutputFormat, WorkerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Render a timestamp in the fixed-width form stored in every TEXT column.
///
/// Fixed millisecond precision with a `Z` suffix keeps lexicographic order
/// equal to chronological order, which the staleness queries rely on.
pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in stored form.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Stored form of `now - age`.
pub fn ts_before(now: DateTime<Utc>, age: Duration) -> String {
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    format_ts(now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

fn conversion_failure(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Parse a UUID-based ID from a text column.
pub(crate) fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_failure(idx, e))?;
    Ok(T::from(uuid))
}

fn parse_opt_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(v) => {
            let uuid = Uuid::parse_str(&v).map_err(|e| conversion_failure(idx, e))?;
            Ok(Some(T::from(uuid)))
        }
        None => Ok(None),
    }
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// Transitions only move forward: `pending → processing → {completed|failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown job status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A conversion job record.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    pub owner: String,
    pub input_key: String,
    pub output_format: OutputFormat,
    pub options: ConversionOptions,
    /// Worker suggested by the selector at submission. Advisory only.
    pub assigned_worker: Option<WorkerId>,
    /// Worker currently (or last) holding the claim.
    pub worker_id: Option<WorkerId>,
    #[serde(skip)]
    pub claim_token: Option<ClaimToken>,
    pub output_key: Option<String>,
    pub progress: u8,
    pub error: Option<String>,
    pub input_size_bytes: Option<i64>,
    pub output_size_bytes: Option<i64>,
    pub size_reduction_percent: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Last write by the claim holder; doubles as the liveness heartbeat.
    pub updated_at: String,
}

impl Job {
    /// Build from a row selected with [`crate::queries::jobs::COLS`].
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let status: String = row.get(1)?;
        let format: String = row.get(4)?;
        let options: String = row.get(5)?;
        let assigned: Option<String> = row.get(6)?;
        let worker: Option<String> = row.get(7)?;
        let progress: i64 = row.get(10)?;

        Ok(Self {
            job_id: parse_id(row, 0)?,
            status: status.parse().map_err(|e| conversion_failure(1, e))?,
            owner: row.get(2)?,
            input_key: row.get(3)?,
            output_format: format.parse().map_err(|e| conversion_failure(4, e))?,
            options: serde_json::from_str(&options).map_err(|e| conversion_failure(5, e))?,
            assigned_worker: assigned.map(WorkerId::from),
            worker_id: worker.map(WorkerId::from),
            claim_token: parse_opt_id(row, 8)?,
            output_key: row.get(9)?,
            progress: progress.clamp(0, 100) as u8,
            error: row.get(11)?,
            input_size_bytes: row.get(12)?,
            output_size_bytes: row.get(13)?,
            size_reduction_percent: row.get(14)?,
            duration_seconds: row.get(15)?,
            created_at: row.get(16)?,
            started_at: row.get(17)?,
            completed_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// TelemetrySnapshot
// ---------------------------------------------------------------------------

/// A worker's self-reported load, overwritten on every publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub worker_id: WorkerId,
    /// CPU-derived load, normalized to 0–100.
    pub load_score: f64,
    pub active_job_count: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub updated_at: DateTime<Utc>,
    /// Freshness window granted by the publisher.
    pub ttl_secs: u64,
}

impl TelemetrySnapshot {
    pub fn expires_at(&self) -> DateTime<Utc> {
        // Clamp so absurd TTLs cannot overflow the timestamp arithmetic.
        let secs = self.ttl_secs.min(365 * 24 * 3600) as i64;
        self.updated_at + chrono::Duration::seconds(secs)
    }

    /// A snapshot is fresh while it is younger than both its own TTL and
    /// the reader's TTL. Snapshots from the future count as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let reader_ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let age = now.signed_duration_since(self.updated_at);
        age < reader_ttl && now < self.expires_at()
    }

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let worker: String = row.get(0)?;
        let active: i64 = row.get(2)?;
        let success: i64 = row.get(3)?;
        let failure: i64 = row.get(4)?;
        let updated_at = parse_ts(row, 5)?;
        let expires_at = parse_ts(row, 6)?;
        let ttl_secs = expires_at
            .signed_duration_since(updated_at)
            .num_seconds()
            .max(0) as u64;

        Ok(Self {
            worker_id: WorkerId::from(worker),
            load_score: row.get(1)?,
            active_job_count: active.max(0) as u32,
            success_count: success.max(0) as u64,
            failure_count: failure.max(0) as u64,
            updated_at,
            ttl_secs,
        })
    }
}
