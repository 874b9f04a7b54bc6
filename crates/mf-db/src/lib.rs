//! mf-db: durable job records, dispatch queues, and telemetry snapshots.
//!
//! This crate provides SQLite-backed storage with connection pooling and
//! embedded migrations. The database file is the shared state between the
//! submitting process and every worker process; all mutation goes through
//! single-statement atomic updates (compare-and-set for claims, insert/delete
//! for queue entries, upsert for telemetry).

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
