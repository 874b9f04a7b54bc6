//! mf-worker: the per-process worker.
//!
//! [`run_worker`] wires up the store, blob store, and tools from a
//! [`Config`], then runs three tasks until cancelled: the execution loop,
//! the telemetry publisher, and the stale-claim sweeper.

pub mod context;
pub mod counters;
pub mod dispatch;
pub mod pipeline;
pub mod publisher;
pub mod worker;

use std::sync::Arc;

use mf_av::ToolRegistry;
use mf_blob::{BlobStore, FsBlobStore};
use mf_core::config::Config;
use mf_core::events::EventBus;
use mf_core::{Result, WorkerId};
use tokio_util::sync::CancellationToken;

pub use context::WorkerContext;
pub use pipeline::JobOutcome;
pub use worker::{poll_once, run_worker_loop, PollOutcome};

/// The configured worker id, else the hostname, else a random id.
pub fn resolve_worker_id(config: &Config) -> WorkerId {
    if let Some(id) = config.worker.worker_id.as_deref() {
        return WorkerId::new(id);
    }
    match hostname::get().ok().and_then(|h| h.into_string().ok()) {
        Some(h) if !h.trim().is_empty() => WorkerId::new(h.trim()),
        _ => {
            let simple = uuid::Uuid::new_v4().simple().to_string();
            WorkerId::new(format!("worker-{}", &simple[..8]))
        }
    }
}

/// Run a worker until `cancel` fires.
pub async fn run_worker(config: Config, cancel: CancellationToken) -> Result<()> {
    let worker_id = resolve_worker_id(&config);
    let db = mf_db::pool::init_pool(&config.store)?;
    let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.blob.root));

    let tools = ToolRegistry::discover(&config.tools);
    if let Err(e) = tools.require("ffmpeg") {
        tracing::warn!("{e}; every conversion will fail until it is installed");
    }

    tracing::info!(
        worker_id = %worker_id,
        db = %config.store.db_path.display(),
        blobs = %config.blob.root.display(),
        "Starting worker"
    );

    let ctx = WorkerContext::new(
        worker_id,
        config,
        db,
        blob,
        tools,
        Arc::new(EventBus::default()),
    );

    let publisher = tokio::spawn(publisher::run_publisher(ctx.clone(), cancel.clone()));
    let sweeper = tokio::spawn(worker::run_sweeper(ctx.clone(), cancel.clone()));

    run_worker_loop(ctx, cancel.clone()).await;

    cancel.cancel();
    let _ = publisher.await;
    let _ = sweeper.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_id_wins() {
        let mut config = Config::default();
        config.worker.worker_id = Some("encoder-7".into());
        assert_eq!(resolve_worker_id(&config).as_str(), "encoder-7");
    }

    #[test]
    fn falls_back_to_hostname_or_random() {
        let id = resolve_worker_id(&Config::default());
        assert!(!id.as_str().is_empty());
    }
}
