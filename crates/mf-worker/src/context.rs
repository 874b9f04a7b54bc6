//! Shared state handed to every worker task.
//!
//! [`WorkerContext`] wraps immutable infrastructure (DB pool, blob store,
//! tools, config) in `Arc`s together with the worker's own load counters.
//! Cloning is cheap; each spawned task gets its own clone.

use std::sync::Arc;

use mf_av::ToolRegistry;
use mf_blob::BlobStore;
use mf_core::config::Config;
use mf_core::events::EventBus;
use mf_core::WorkerId;
use mf_db::pool::DbPool;

use crate::counters::LoadCounters;

#[derive(Clone)]
pub struct WorkerContext {
    pub worker_id: WorkerId,
    pub db: DbPool,
    pub blob: Arc<dyn BlobStore>,
    pub tools: Arc<ToolRegistry>,
    pub config: Arc<Config>,
    pub event_bus: Arc<EventBus>,
    /// Local to this worker; others only see it through published telemetry.
    pub counters: Arc<LoadCounters>,
}

impl WorkerContext {
    pub fn new(
        worker_id: WorkerId,
        config: Config,
        db: DbPool,
        blob: Arc<dyn BlobStore>,
        tools: ToolRegistry,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            worker_id,
            db,
            blob,
            tools: Arc::new(tools),
            config: Arc::new(config),
            event_bus,
            counters: Arc::new(LoadCounters::default()),
        }
    }
}
