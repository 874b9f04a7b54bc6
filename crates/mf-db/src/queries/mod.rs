//! Database query modules.

pub mod jobs;
pub mod queues;
pub mod telemetry;
