use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Process-wide counters, see [`global`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalMetrics {
    pub systems_created: u64,
    /// Systems whose last handle was dropped.
    pub systems_destroyed: u64,
}

pub(crate) struct GlobalMetricsStorage {
    pub(crate) systems_created: AtomicU64,
    pub(crate) systems_destroyed: AtomicU64,
}

impl GlobalMetricsStorage {
    const fn new() -> Self {
        GlobalMetricsStorage {
            systems_created: AtomicU64::new(0),
            systems_destroyed: AtomicU64::new(0),
        }
    }

    fn make_pub(&self) -> GlobalMetrics {
        GlobalMetrics {
            systems_created: self.systems_created.load(Ordering::Relaxed),
            systems_destroyed: self.systems_destroyed.load(Ordering::Relaxed),
        }
    }
}

pub(crate) static GLOBAL: GlobalMetricsStorage = GlobalMetricsStorage::new();

pub fn global() -> GlobalMetrics {
    GLOBAL.make_pub()
}

/// Counters of one system, see [`crate::SystemHandle::metrics`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobMetrics {
    pub jobs_submitted: u64,
    /// Submissions handed back because the pool was exhausted or the system
    /// was shutting down.
    pub jobs_rejected: u64,
    /// Handlers called, including those of aborted jobs.
    pub jobs_completed: u64,
    pub jobs_aborted: u64,
    /// Times a job had to wait in a fence-wait queue.
    pub jobs_blocked: u64,
    pub fences_raised: u64,
}

#[derive(Default)]
pub(crate) struct JobMetricsStorage {
    pub(crate) jobs_submitted: AtomicU64,
    pub(crate) jobs_rejected: AtomicU64,
    pub(crate) jobs_completed: AtomicU64,
    pub(crate) jobs_aborted: AtomicU64,
    pub(crate) jobs_blocked: AtomicU64,
    pub(crate) fences_raised: AtomicU64,
}

impl JobMetricsStorage {
    pub(crate) fn make_pub(&self) -> JobMetrics {
        JobMetrics {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_aborted: self.jobs_aborted.load(Ordering::Relaxed),
            jobs_blocked: self.jobs_blocked.load(Ordering::Relaxed),
            fences_raised: self.fences_raised.load(Ordering::Relaxed),
        }
    }
}
