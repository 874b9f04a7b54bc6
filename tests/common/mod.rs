//! Shared test harness for integration tests.
//!
//! [`TestHarness`] owns a temp directory holding a file-backed SQLite store,
//! a blob root, a scratch directory for job workspaces, and a fake `ffmpeg`
//! shell script. Workers and the job service built from one harness share
//! the same store, blobs, and [`EventBus`].

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use mf_av::ToolRegistry;
use mf_blob::{BlobKey, BlobStore, FsBlobStore};
use mf_core::config::Config;
use mf_core::events::{EventBus, EventPayload};
use mf_core::{JobId, WorkerId};
use mf_db::models::{format_ts, TelemetrySnapshot};
use mf_db::pool::{init_pool, DbPool};
use mf_db::queries::telemetry;
use mf_dispatch::JobService;
use mf_worker::WorkerContext;
use tempfile::TempDir;

/// Writes a short output and exits 0.
pub const TRANSCODER_OK: &str = r#"#!/bin/sh
for arg; do out="$arg"; done
printf 'converted' > "$out"
"#;

/// Writes a diagnostic to stderr and exits 1.
pub const TRANSCODER_FAIL: &str = r#"#!/bin/sh
echo "Invalid data found when processing input" >&2
exit 1
"#;

/// Never finishes within a test's job timeout.
pub const TRANSCODER_HANG: &str = r#"#!/bin/sh
sleep 30
"#;

pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
    pub db: DbPool,
    pub blob: Arc<dyn BlobStore>,
    pub event_bus: Arc<EventBus>,
}

impl TestHarness {
    /// Harness whose transcoder always succeeds.
    pub fn new() -> Self {
        Self::with_transcoder(TRANSCODER_OK)
    }

    /// Harness whose `ffmpeg` is the given shell script.
    pub fn with_transcoder(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let ffmpeg = write_script(dir.path(), "ffmpeg", script);
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).expect("failed to create scratch dir");

        let mut config = Config::default();
        config.store.db_path = dir.path().join("mediaflow.db");
        // Enough for every contender in the claim race to hold a connection.
        config.store.pool_size = 16;
        config.blob.root = dir.path().join("blobs");
        config.tools.ffmpeg_path = Some(ffmpeg);
        config.worker.scratch_dir = Some(scratch);
        config.worker.own_queue_timeout_ms = 50;
        config.worker.fallback_queue_timeout_ms = 50;
        config.worker.poll_interval_ms = 10;
        config.worker.job_timeout_secs = 1;
        config.worker.stale_claim_secs = 60;
        config.worker.error_backoff_secs = 1;
        config.metrics.enabled = false;

        let db = init_pool(&config.store).expect("failed to create pool");
        let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.blob.root));

        Self {
            dir,
            config,
            db,
            blob,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    pub fn conn(&self) -> mf_db::pool::PooledConnection {
        mf_db::pool::get_conn(&self.db).expect("failed to get db connection")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn service(&self) -> JobService {
        JobService::new(
            self.db.clone(),
            self.blob.clone(),
            self.event_bus.clone(),
            self.config.telemetry.ttl(),
        )
    }

    /// A worker context sharing this harness's store, blobs, and events.
    pub fn worker(&self, id: &str) -> WorkerContext {
        self.worker_with_blob(id, self.blob.clone())
    }

    /// A worker context that reads and writes blobs through `blob` instead.
    pub fn worker_with_blob(&self, id: &str, blob: Arc<dyn BlobStore>) -> WorkerContext {
        WorkerContext::new(
            WorkerId::from(id),
            self.config.clone(),
            self.db.clone(),
            blob,
            ToolRegistry::discover(&self.config.tools),
            self.event_bus.clone(),
        )
    }

    /// Store an input blob.
    pub async fn put_input(&self, owner: &str, path: &str, data: &[u8]) -> BlobKey {
        let key = BlobKey::new(owner, path).expect("invalid blob key");
        self.blob
            .put(&key, Bytes::copy_from_slice(data), "application/octet-stream")
            .await
            .expect("failed to store input");
        key
    }

    /// Record a fresh telemetry snapshot for `worker`.
    pub fn report_load(&self, worker: &str, load_score: f64, active_job_count: u32) {
        let snap = TelemetrySnapshot {
            worker_id: WorkerId::from(worker),
            load_score,
            active_job_count,
            success_count: 0,
            failure_count: 0,
            updated_at: Utc::now(),
            ttl_secs: self.config.telemetry.ttl_secs,
        };
        telemetry::upsert_snapshot(&self.conn(), &snap).expect("failed to store telemetry");
    }

    /// Push a job's `updated_at` back by `secs` seconds.
    pub fn backdate(&self, job_id: JobId, secs: i64) {
        let past = format_ts(Utc::now() - chrono::Duration::seconds(secs));
        self.conn()
            .execute(
                "UPDATE jobs SET updated_at = ?1 WHERE id = ?2",
                [past, job_id.to_string()],
            )
            .expect("failed to backdate job");
    }

    /// Progress values broadcast for `job_id`, oldest first.
    pub fn progress_events(&self, job_id: JobId) -> Vec<u8> {
        let mut events: Vec<u8> = self
            .event_bus
            .recent_events(usize::MAX)
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::JobProgress { job_id: id, progress } if id == job_id => {
                    Some(progress)
                }
                _ => None,
            })
            .collect();
        events.reverse();
        events
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).expect("failed to create bin dir");
    let path = bin.join(name);
    std::fs::write(&path, body).expect("failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
    path
}
