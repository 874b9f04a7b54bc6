//! mf-dispatch: routing new jobs toward the least-loaded worker.
//!
//! - [`selector`] -- pure least-loaded selection over telemetry snapshots.
//! - [`load`] -- derived load score and `idle`/`available`/`busy` labels.
//! - [`service`] -- [`JobService`]: submit, status, list, queue and worker
//!   stats.

pub mod load;
pub mod selector;
pub mod service;

pub use load::{LoadLabel, WorkerStats};
pub use selector::{select_worker, Selection};
pub use service::{JobService, QueueStats, SubmitRequest, SubmitResponse};
