pub mod job;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod stats;
/// basic std::sync types reexported here so that we can hook loom into them for
/// testing.
pub mod sync;

use crossbeam_utils::{Backoff, CachePadded};
use rand::{Rng, RngCore, SeedableRng};
use rand::rngs::SmallRng;
use std::io;

use sync::{Arc, Mutex, Condvar, AtomicU64, Ordering, thread, lock};
use job::JobRef;
use queue::WorkerQueue;
use scheduler::{Scheduler, SchedulerBuilder};
use shutdown::Shutdown;
use stats::WorkerStats;

/// Data accessible by all workers and by the threads submitting work.
pub(crate) struct Shared {
    /// One queue per worker thread.
    pub queues: Vec<CachePadded<WorkerQueue>>,
    /// State and logic to put worker threads to sleep and wake them up.
    pub sleep: Sleep,
    /// state and logic to handle shutting down.
    pub shutdown: Shutdown,
    pub stats: Vec<CachePadded<WorkerStats>>,
    handlers: WorkerHooks,
}

impl Shared {
    fn new(num_threads: usize, handlers: WorkerHooks) -> Self {
        Shared {
            queues: (0..num_threads).map(|_| CachePadded::new(WorkerQueue::new())).collect(),
            sleep: Sleep::new(),
            shutdown: Shutdown::new(),
            stats: (0..num_threads).map(|_| CachePadded::new(WorkerStats::new())).collect(),
            handlers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }
}

/// Spawn the worker threads.
///
/// Every queue needs its owner thread: a job requeued behind a dependency that sits in
/// an ownerless queue could wait forever. So if any thread fails to spawn, the ones
/// that did are shut down and the error is returned.
pub(crate) fn init(params: SchedulerBuilder) -> io::Result<Scheduler> {
    let num_threads = params.num_threads as usize;
    let mut rng = params.rng;

    let shared = Arc::new(Shared::new(num_threads, WorkerHooks {
        start: params.start_handler,
        exit: params.exit_handler,
    }));

    let mut threads = Vec::with_capacity(num_threads);
    let mut spawn_error = None;
    for i in 0..num_threads {
        // Derive each worker's generator from the scheduler's so that a seeded
        // scheduler is reproducible down to victim selection.
        let mut worker = Worker {
            index: i,
            rng: SmallRng::seed_from_u64(rng.next_u64()),
            shared: shared.clone(),
        };

        let mut builder = thread::Builder::new()
            .name((params.name_handler)(i as u32));

        if let Some(stack_size) = params.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(move || {
            profiling::register_thread!("Worker");

            worker.run();
        });

        match handle {
            Ok(handle) => threads.push(handle),
            Err(err) => {
                tracing::error!(worker = i, error = %err, "failed to spawn worker thread");
                spawn_error = Some(err);
                break;
            }
        }
    }

    let scheduler = Scheduler::from_parts(shared, threads, rng);

    if let Some(err) = spawn_error {
        // Dropping the scheduler stops and joins the workers that did start.
        drop(scheduler);
        return Err(err);
    }

    tracing::debug!(workers = num_threads, "scheduler started");

    Ok(scheduler)
}

/// The shared condition variable workers block on when there is no work anywhere.
///
/// Producers bump `generation` under the mutex after making work available. A worker
/// reads the generation before looking for work and only blocks if it hasn't changed,
/// checked under the same mutex, so a wake up can't slip in between a failed search
/// and the wait.
pub(crate) struct Sleep {
    generation: AtomicU64,
    sleepers: Mutex<u32>,
    cond: Condvar,
}

impl Sleep {
    fn new() -> Self {
        Sleep {
            generation: AtomicU64::new(0),
            sleepers: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wake up one sleeping worker, if any.
    pub fn wake_one(&self) {
        let sleepers = lock(&self.sleepers);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if *sleepers > 0 {
            profiling::scope!("notify_one");
            self.cond.notify_one();
        }
    }

    /// Wake all workers.
    ///
    /// This is a bit heavy handed and mostly intended for the shutdown code. In the majority
    /// of cases (other than shutdown), using `wake_one` is better.
    pub fn wake_all(&self) {
        let _sleepers = lock(&self.sleepers);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// Block until the generation moves past `seen` or the scheduler shuts down.
    fn sleep(&self, seen: u64, shutdown: &Shutdown) {
        profiling::scope!("sleep");
        let mut sleepers = lock(&self.sleepers);
        *sleepers += 1;
        while self.generation.load(Ordering::SeqCst) == seen && !shutdown.is_shutting_down() {
            sleepers = match self.cond.wait(sleepers) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *sleepers -= 1;
    }
}

struct Worker {
    index: usize,
    rng: SmallRng,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(&mut self) {
        let shared = Arc::clone(&self.shared);

        if let Some(handler) = &shared.handlers.start {
            handler.run(self.index as u32);
        }

        tracing::debug!(worker = self.index, "worker started");

        let backoff = Backoff::new();

        loop {
            // Queued jobs that haven't started are abandoned by the shutdown.
            if shared.shutdown.is_shutting_down() {
                break;
            }

            let seen = shared.sleep.generation();

            if let Some(job) = self.find_job() {
                if job.ready() {
                    self.execute_job(job);
                    backoff.reset();
                } else {
                    // Dependencies are still running somewhere. Put the job at the far end
                    // of our queue and back off a little before looking again.
                    shared.queues[self.index].push_deferred(job);
                    shared.stats[self.index].job_requeued();
                    backoff.snooze();
                }

                continue;
            }

            // Couldn't find work to do in our or another worker's queue, so
            // it's sleepy time.
            shared.stats[self.index].went_to_sleep();
            shared.sleep.sleep(seen, &shared.shutdown);
        }

        // Shutdown phase.

        if let Some(handler) = &shared.handlers.exit {
            handler.run(self.index as u32);
        }

        tracing::debug!(worker = self.index, "worker exiting");
    }

    /// Look for a job in our own queue, then in a random peer's, then anywhere.
    fn find_job(&mut self) -> Option<JobRef> {
        if let Some(job) = self.shared.queues[self.index].pop() {
            return Some(job);
        }

        let job = self.steal_from_random_peer().or_else(|| self.steal_from_any());

        if let Some(job) = &job {
            tracing::trace!(worker = self.index, job = %job.id(), "stole job");
            self.shared.stats[self.index].job_stolen();
        }

        job
    }

    fn steal_from_random_peer(&mut self) -> Option<JobRef> {
        let num_workers = self.shared.num_workers();
        if num_workers < 2 {
            return None;
        }

        profiling::scope!("steal_from_peer");

        // Pick uniformly among the other workers.
        let mut victim = self.rng.gen_range(0..num_workers - 1);
        if victim >= self.index {
            victim += 1;
        }

        self.shared.queues[victim].steal()
    }

    fn steal_from_any(&mut self) -> Option<JobRef> {
        profiling::scope!("steal_from_any");

        let num_workers = self.shared.num_workers();
        for offset in 1..num_workers {
            let idx = (self.index + offset) % num_workers;
            if let Some(job) = self.shared.queues[idx].steal() {
                return Some(job);
            }
        }

        None
    }

    fn execute_job(&mut self, job: JobRef) {
        profiling::scope!("execute_job");

        // Payloads created by `Scheduler::submit` capture their own panics. This only
        // catches panics from jobs built by hand, which must not take the worker down.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            job.invoke();
        }));

        if result.is_err() {
            tracing::warn!(worker = self.index, job = %job.id(), "job panicked");
        }

        job.finish();
        self.shared.stats[self.index].job_executed();
    }
}

pub(crate) struct WorkerHooks {
    start: Option<Box<dyn WorkerHook>>,
    exit: Option<Box<dyn WorkerHook>>,
}

pub trait WorkerHook: Send + Sync {
    fn run(&self, worker_id: u32);
}

impl<F> WorkerHook for F where F: Fn(u32) + Send + Sync + 'static {
    fn run(&self, worker_id: u32) { self(worker_id) }
}

/// The random source used to pick queues.
pub(crate) type RandomSource = Box<dyn RngCore + Send>;

#[cfg(test)]
fn idle_worker(index: usize, shared: &Arc<Shared>) -> Worker {
    Worker { index, rng: SmallRng::seed_from_u64(7), shared: shared.clone() }
}

#[test]
fn find_job_prefers_own_queue() {
    let shared = Arc::new(Shared::new(2, WorkerHooks { start: None, exit: None }));
    let mut worker = idle_worker(0, &shared);

    let own = job::Job::new_ref(|| {}, &[]);
    let other = job::Job::new_ref(|| {}, &[]);
    shared.queues[0].push(own.clone());
    shared.queues[1].push(other.clone());

    assert_eq!(worker.find_job().unwrap().id(), own.id());
    assert_eq!(worker.find_job().unwrap().id(), other.id());
    assert!(worker.find_job().is_none());

    let mut stats = stats::Stats::new();
    shared.stats[0].accumulate(&mut stats);
    assert_eq!(stats.stolen, 1);
}

#[test]
fn find_job_steals_oldest_jobs_from_any_queue() {
    let shared = Arc::new(Shared::new(3, WorkerHooks { start: None, exit: None }));
    let mut worker = idle_worker(0, &shared);

    // Only the last queue has work: whichever peer the worker picks first, it ends
    // up taking from the front of that queue.
    let jobs: Vec<JobRef> = (0..20).map(|_| job::Job::new_ref(|| {}, &[])).collect();
    for job in &jobs {
        shared.queues[2].push(job.clone());
    }

    for expected in &jobs {
        assert_eq!(worker.find_job().unwrap().id(), expected.id());
    }
    assert!(worker.find_job().is_none());
    assert!(shared.queues[2].is_empty());

    let mut stats = stats::Stats::new();
    shared.stats[0].accumulate(&mut stats);
    assert_eq!(stats.stolen, 20);
}

#[test]
fn single_worker_has_no_peers() {
    let shared = Arc::new(Shared::new(1, WorkerHooks { start: None, exit: None }));
    let mut worker = idle_worker(0, &shared);

    assert!(worker.steal_from_random_peer().is_none());
    assert!(worker.find_job().is_none());

    let job = job::Job::new_ref(|| {}, &[]);
    shared.queues[0].push(job.clone());
    assert_eq!(worker.find_job().unwrap().id(), job.id());
}
