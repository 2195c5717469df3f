use std::fmt;
use super::sync::{Arc, Mutex, AtomicBool, Ordering, lock};

// For debugging.
// Use std's atomic type explicitly here because loom's doesn't support static initialization.
static NEXT_JOB_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// The deferred computation of a job.
pub type Payload = Box<dyn FnOnce() + Send + 'static>;

/// Shared ownership of a job.
///
/// A job is referenced by the queue that holds it, by handles, and by the jobs that
/// list it as a dependency. Jobs only ever point to their dependencies, never to
/// their dependents, so the graph can't contain reference cycles unless a job is
/// passed as its own transitive dependency.
pub type JobRef = Arc<Job>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Job#{}", self.0)
    }
}

/// A schedulable unit of work.
///
/// A job runs its payload at most once, and only after all of its dependencies are
/// done. The scheduler, not the job, enforces that ordering: `invoke` does not check
/// readiness.
pub struct Job {
    id: JobId,
    payload: Mutex<Option<Payload>>,
    // Fixed at construction, read without synchronization afterwards.
    dependencies: Box<[JobRef]>,
    // Set once, never cleared.
    done: AtomicBool,
}

impl Job {
    pub fn new<F>(payload: F, dependencies: &[JobRef]) -> Self
    where F: FnOnce() + Send + 'static
    {
        Job {
            id: JobId(NEXT_JOB_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed)),
            payload: Mutex::new(Some(Box::new(payload))),
            dependencies: dependencies.to_vec().into_boxed_slice(),
            done: AtomicBool::new(false),
        }
    }

    pub fn new_ref<F>(payload: F, dependencies: &[JobRef]) -> JobRef
    where F: FnOnce() + Send + 'static
    {
        Arc::new(Job::new(payload, dependencies))
    }

    pub fn id(&self) -> JobId { self.id }

    pub fn dependencies(&self) -> &[JobRef] { &self.dependencies }

    /// Returns true if every dependency is done.
    ///
    /// Lock-free and without side effects. The result is only a snapshot: a job that
    /// is not ready may become ready right after this returns, never the opposite.
    #[inline]
    pub fn ready(&self) -> bool {
        self.dependencies.iter().all(|dep| dep.is_done())
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        // Pairs with the release store in `finish` so that everything the dependency
        // wrote is visible to the dependent job.
        self.done.load(Ordering::Acquire)
    }

    /// Mark the job as done. Idempotent.
    #[inline]
    pub fn finish(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Run the payload.
    ///
    /// Returns false if the payload had already been taken, either because the job
    /// was invoked before or because it was abandoned.
    pub fn invoke(&self) -> bool {
        // Take the payload out before running it so that the lock isn't held while
        // the job executes.
        let payload = lock(&self.payload).take();
        match payload {
            Some(payload) => {
                payload();
                true
            }
            None => false,
        }
    }

    /// Drop the payload without running it.
    ///
    /// Used on shutdown for jobs that were queued but never started. Whatever the
    /// payload captured is released, which is how handles learn that their job
    /// will never run.
    pub(crate) fn abandon(&self) -> bool {
        let payload = lock(&self.payload).take();
        payload.is_some()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies.iter().map(|dep| dep.id).collect::<Vec<_>>())
            .field("done", &self.is_done())
            .finish()
    }
}

#[test]
fn ready_without_dependencies() {
    let job = Job::new(|| {}, &[]);
    assert!(job.ready());
    assert!(!job.is_done());
}

#[test]
fn ready_after_dependency_finishes() {
    let dep = Job::new_ref(|| {}, &[]);
    let job = Job::new(|| {}, &[dep.clone()]);

    assert!(!job.ready());
    dep.finish();
    assert!(job.ready());
}

#[test]
fn ready_needs_all_dependencies() {
    let deps: Vec<JobRef> = (0..4).map(|_| Job::new_ref(|| {}, &[])).collect();
    let job = Job::new(|| {}, &deps);

    for dep in &deps {
        assert!(!job.ready());
        dep.finish();
    }

    assert!(job.ready());
}

#[test]
fn finish_is_idempotent() {
    let dep = Job::new_ref(|| {}, &[]);
    let job = Job::new(|| {}, &[dep.clone()]);

    dep.finish();
    let once = job.ready();
    dep.finish();
    let twice = job.ready();

    assert!(once);
    assert_eq!(once, twice);
    assert!(dep.is_done());
}

#[test]
fn invoke_runs_payload_once() {
    use std::sync::atomic::AtomicU32;

    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let job = Job::new(move || { c.fetch_add(1, Ordering::SeqCst); }, &[]);

    assert!(job.invoke());
    assert!(!job.invoke());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn abandon_drops_payload() {
    let token = Arc::new(());
    let t = token.clone();
    let job = Job::new(move || { let _t = t; }, &[]);

    assert_eq!(Arc::strong_count(&token), 2);
    assert!(job.abandon());
    assert_eq!(Arc::strong_count(&token), 1);
    assert!(!job.invoke());
}

#[test]
fn unique_ids() {
    let a = Job::new(|| {}, &[]);
    let b = Job::new(|| {}, &[]);
    assert_ne!(a.id(), b.id());
}
