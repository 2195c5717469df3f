use crate::sync::{AtomicU64, Ordering};

/// Counters updated by a single worker thread and read by anyone.
///
/// Relaxed atomics: the values are only meant for debugging and tests, they don't
/// synchronize anything.
pub(crate) struct WorkerStats {
    jobs_executed: AtomicU64,
    requeued: AtomicU64,
    stolen: AtomicU64,
    slept: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Self {
        WorkerStats {
            jobs_executed: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            stolen: AtomicU64::new(0),
            slept: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn job_executed(&self) { self.jobs_executed.fetch_add(1, Ordering::Relaxed); }
    #[inline]
    pub fn job_requeued(&self) { self.requeued.fetch_add(1, Ordering::Relaxed); }
    #[inline]
    pub fn job_stolen(&self) { self.stolen.fetch_add(1, Ordering::Relaxed); }
    #[inline]
    pub fn went_to_sleep(&self) { self.slept.fetch_add(1, Ordering::Relaxed); }

    pub fn accumulate(&self, stats: &mut Stats) {
        stats.jobs_executed += self.jobs_executed.load(Ordering::Relaxed);
        stats.requeued += self.requeued.load(Ordering::Relaxed);
        stats.stolen += self.stolen.load(Ordering::Relaxed);
        stats.slept += self.slept.load(Ordering::Relaxed);
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// number of jobs executed.
    pub jobs_executed: u64,
    /// How many times a job was put back in a queue because its dependencies were not done.
    pub requeued: u64,
    /// Number of jobs taken from another worker's queue.
    pub stolen: u64,
    /// How many times a worker blocked on the condition variable.
    pub slept: u64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }
}
