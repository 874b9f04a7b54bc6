//! Blocking queue pops.
//!
//! SQLite has no blocking list pop, so a pop polls the queue at the
//! configured interval until an entry appears, the timeout elapses, or the
//! worker is cancelled. These waits are the only suspension points of the
//! execution loop besides the job itself.

use std::time::Duration;

use mf_core::{JobId, Result};
use mf_db::pool::{get_conn, DbPool};
use mf_db::queries::queues;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pop the head of `queue`, waiting up to `timeout` for an entry.
///
/// Returns `Ok(None)` on timeout or cancellation.
pub async fn pop_blocking(
    db: &DbPool,
    queue: &str,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<JobId>> {
    let deadline = Instant::now() + timeout;

    loop {
        let popped = {
            let conn = get_conn(db)?;
            queues::try_pop(&conn, queue)?
        };
        if popped.is_some() {
            return Ok(popped);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval.min(deadline - now)) => {}
            _ = cancel.cancelled() => return Ok(None),
        }
    }
}
