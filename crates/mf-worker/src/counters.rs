//! Per-worker job counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// In-flight and cumulative outcome counts for one worker process.
#[derive(Debug, Default)]
pub struct LoadCounters {
    active: AtomicU32,
    success: AtomicU64,
    failure: AtomicU64,
}

impl LoadCounters {
    /// Mark a job as in flight until the returned guard is dropped.
    pub fn begin(self: &Arc<Self>) -> ActiveJob {
        let n = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        mf_core::metrics::set_jobs_in_progress(n);
        ActiveJob {
            counters: Arc::clone(self),
        }
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }
}

/// Guard returned by [`LoadCounters::begin`].
#[derive(Debug)]
pub struct ActiveJob {
    counters: Arc<LoadCounters>,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        let n = self.counters.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        mf_core::metrics::set_jobs_in_progress(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_active_jobs() {
        let counters = Arc::new(LoadCounters::default());
        {
            let _job = counters.begin();
            assert_eq!(counters.active(), 1);
        }
        assert_eq!(counters.active(), 0);

        counters.record_success();
        counters.record_failure();
        counters.record_failure();
        assert_eq!(counters.success(), 1);
        assert_eq!(counters.failure(), 2);
    }
}
