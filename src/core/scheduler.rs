use rand::{Rng, RngCore, SeedableRng};
use rand::rngs::SmallRng;
use std::io;

use super::{Shared, WorkerHook, RandomSource};
use super::job::{Job, JobRef};
use super::stats::Stats;
use super::sync::{Arc, Mutex, thread, lock};
use crate::handle::{JobHandle, result_slot};

/// A fixed-size pool of worker threads executing jobs.
///
/// Jobs are placed in a random worker's queue, and idle workers steal from each other.
/// A job only runs once all of its dependencies are done.
///
/// The scheduler stops when `stop` is called or when it is dropped. It can't be
/// restarted.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Vec<thread::JoinHandle<()>>,
    rng: Mutex<RandomSource>,
}

impl Scheduler {
    /// Create a scheduler with `worker_count` threads and the default configuration.
    ///
    /// Panics if the worker threads can't be spawned.
    pub fn new(worker_count: u32) -> Self {
        Scheduler::builder()
            .with_worker_threads(worker_count)
            .build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder {
            num_threads: Scheduler::default_worker_count(),
            rng: Box::new(SmallRng::from_entropy()),
            start_handler: None,
            exit_handler: None,
            name_handler: Box::new(|idx| format!("Worker#{}", idx)),
            stack_size: None,
        }
    }

    /// One less than the available parallelism so that the thread submitting work keeps
    /// a core for itself, and at least one.
    pub fn default_worker_count() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1) as u32
    }

    pub(crate) fn from_parts(shared: Arc<Shared>, threads: Vec<thread::JoinHandle<()>>, rng: RandomSource) -> Self {
        Scheduler {
            shared,
            threads,
            rng: Mutex::new(rng),
        }
    }

    /// Schedule `function` to run after all of `dependencies` are done.
    ///
    /// The function's arguments are whatever it captures. A panic in the function is
    /// captured and resumed when joining the handle.
    pub fn submit<F, Output>(&self, function: F, dependencies: &[JobRef]) -> JobHandle<Output>
    where
        F: FnOnce() -> Output + Send + 'static,
        Output: Send + 'static,
    {
        profiling::scope!("submit");

        let (completer, output) = result_slot();
        let job = Job::new_ref(move || completer.complete_with(function), dependencies);

        self.submit_job(job.clone());

        JobHandle::new(job, output)
    }

    /// Run `function` once for each index in `0..item_count`, with indices grouped into
    /// jobs of `chunk_size` items.
    ///
    /// The returned handle resolves to the outputs in index order once every chunk is
    /// done. Grouping amortizes the per-job overhead when the work per item is small.
    pub fn submit_group<F, Output>(&self, function: F, item_count: usize, chunk_size: usize) -> JobHandle<Vec<Output>>
    where
        F: Fn(usize) -> Output + Send + Sync + 'static,
        Output: Send + 'static,
    {
        crate::group::submit_group(self, function, item_count, chunk_size)
    }

    /// Schedule an already built job.
    ///
    /// The job is placed in the queue of a worker picked uniformly at random and one
    /// sleeping worker is woken up.
    pub fn submit_job(&self, job: JobRef) {
        let num_workers = self.shared.num_workers();
        let idx = lock(&self.rng).gen_range(0..num_workers);

        self.shared.queues[idx].push(job);
        self.shared.sleep.wake_one();
    }

    /// Stop all workers and wait for them to exit.
    ///
    /// Jobs that are running finish normally. Jobs that are still queued are abandoned:
    /// they never run, and joining their handles reports it. Returns the number of
    /// abandoned jobs.
    pub fn stop(mut self) -> usize {
        self.shut_down()
    }

    pub fn num_worker_threads(&self) -> u32 { self.shared.num_workers() as u32 }

    /// Sum of the statistics of all workers.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats::new();
        for worker in &self.shared.stats {
            worker.accumulate(&mut stats);
        }

        stats
    }

    fn shut_down(&mut self) -> usize {
        if !self.shared.shutdown.begin() {
            return 0;
        }

        self.shared.sleep.wake_all();

        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("a worker thread panicked");
            }
        }

        // Nothing pops from the queues anymore.
        let mut abandoned = 0;
        for queue in &self.shared.queues {
            for job in queue.drain() {
                if job.abandon() {
                    abandoned += 1;
                }
            }
        }

        if abandoned > 0 {
            tracing::warn!(abandoned, "scheduler stopped with queued jobs");
        }

        tracing::debug!("scheduler stopped");

        abandoned
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shut_down();
    }
}

pub struct SchedulerBuilder {
    pub(crate) num_threads: u32,
    pub(crate) rng: RandomSource,
    pub(crate) start_handler: Option<Box<dyn WorkerHook>>,
    pub(crate) exit_handler: Option<Box<dyn WorkerHook>>,
    pub(crate) name_handler: Box<dyn Fn(u32) -> String>,
    pub(crate) stack_size: Option<usize>,
}

impl SchedulerBuilder {
    /// Called on each worker thread before it starts processing jobs.
    pub fn with_start_handler<F>(mut self, handler: F) -> Self
    where F: Fn(u32) + Send + Sync + 'static
    {
        self.start_handler = Some(Box::new(handler));
        self
    }

    /// Called on each worker thread right before it exits.
    pub fn with_exit_handler<F>(mut self, handler: F) -> Self
    where F: Fn(u32) + Send + Sync + 'static
    {
        self.exit_handler = Some(Box::new(handler));
        self
    }

    pub fn with_thread_names<F>(mut self, handler: F) -> Self
    where F: Fn(u32) -> String + 'static
    {
        self.name_handler = Box::new(handler);
        self
    }

    pub fn with_worker_threads(mut self, num_threads: u32) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// The random source used to place jobs in queues and to pick which worker to
    /// steal from.
    pub fn with_random_source<R>(mut self, rng: R) -> Self
    where R: RngCore + Send + 'static
    {
        self.rng = Box::new(rng);
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_random_source(SmallRng::seed_from_u64(seed))
    }

    /// Spawn the worker threads.
    ///
    /// Fails if any of the worker threads can't be spawned, in which case the workers
    /// that did start are stopped before returning.
    pub fn try_build(self) -> io::Result<Scheduler> {
        crate::core::init(self)
    }

    /// Spawn the worker threads.
    ///
    /// Panics if a worker thread can't be spawned. See `try_build`.
    pub fn build(self) -> Scheduler {
        match self.try_build() {
            Ok(scheduler) => scheduler,
            Err(err) => panic!("failed to spawn worker threads: {}", err),
        }
    }
}

#[cfg(test)]
fn seeded_scheduler(num_threads: u32) -> Scheduler {
    Scheduler::builder()
        .with_worker_threads(num_threads)
        .with_seed(0x5eed)
        .build()
}

#[test]
fn simple_jobs() {
    let scheduler = seeded_scheduler(3);

    let mut handles = Vec::new();
    for i in 0..10_000u32 {
        handles.push(scheduler.submit(move || i * 2, &[]));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join(), i as u32 * 2);
    }

    assert_eq!(scheduler.stop(), 0);
}

#[test]
fn fan_in_concatenation() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let scheduler = seeded_scheduler(4);
    let inputs = ["AA0", "BB1", "CC2", "DD3", "EE4"];

    let handles: Vec<JobHandle<String>> = inputs.iter().map(|&input| {
        scheduler.submit(move || input.to_string(), &[])
    }).collect();

    let dependencies: Vec<JobRef> = handles.iter().map(|h| h.job().clone()).collect();
    let deps = dependencies.clone();
    let ran_after_deps = Arc::new(AtomicBool::new(false));
    let flag = ran_after_deps.clone();

    let last = scheduler.submit(move || {
        flag.store(deps.iter().all(|dep| dep.is_done()), Ordering::SeqCst);

        let mut output: String = handles.into_iter().map(|h| h.join()).collect();
        output.push_str("FF5");
        output
    }, &dependencies);

    assert_eq!(last.join(), "AA0BB1CC2DD3EE4FF5");
    assert!(ran_after_deps.load(Ordering::SeqCst));

    scheduler.stop();
}

#[test]
fn chained_jobs_run_in_order() {
    let scheduler = seeded_scheduler(4);

    for _ in 0..100 {
        let accumulator = Arc::new(Mutex::new(String::new()));

        let mut previous: Option<JobRef> = None;
        let mut handles = Vec::new();
        for i in 0..5 {
            let acc = accumulator.clone();
            let deps: Vec<JobRef> = previous.iter().cloned().collect();
            let handle = scheduler.submit(move || {
                lock(&acc).push_str(&format!("{}{}", (b'A' + i) as char, i));
            }, &deps);
            previous = Some(handle.job().clone());
            handles.push(handle);
        }

        for handle in handles {
            handle.join();
        }

        assert_eq!(*lock(&accumulator), "A0B1C2D3E4");
    }

    scheduler.stop();
}

#[test]
fn no_lost_updates() {
    let scheduler = seeded_scheduler(4);
    let n = 20_000;
    let counter = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..n).map(|_| {
        let counter = counter.clone();
        scheduler.submit(move || { *lock(&counter) += 1; }, &[])
    }).collect();

    for handle in handles {
        handle.join();
    }

    assert_eq!(*lock(&counter), n);

    scheduler.stop();
}

#[test]
fn independent_jobs_run_exactly_once() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let scheduler = seeded_scheduler(6);
    let n = 5_000;
    let counts: Arc<Vec<AtomicU32>> = Arc::new((0..n).map(|_| AtomicU32::new(0)).collect());

    let handles: Vec<_> = (0..n).map(|i| {
        let counts = counts.clone();
        scheduler.submit(move || { counts[i].fetch_add(1, Ordering::SeqCst); }, &[])
    }).collect();

    for handle in handles {
        handle.join();
    }

    for count in counts.iter() {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    scheduler.stop();
}

#[test]
fn random_dags_complete() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let scheduler = seeded_scheduler(3);
    let mut rng = SmallRng::seed_from_u64(1234);
    let n = 500;
    let executed = Arc::new(AtomicUsize::new(0));

    let mut jobs: Vec<JobRef> = Vec::with_capacity(n);
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let mut deps = Vec::new();
        if i > 0 {
            for _ in 0..rng.gen_range(0..4) {
                deps.push(jobs[rng.gen_range(0..i)].clone());
            }
        }

        let check = deps.clone();
        let executed = executed.clone();
        let handle = scheduler.submit(move || {
            assert!(check.iter().all(|dep| dep.is_done()));
            executed.fetch_add(1, Ordering::SeqCst);
        }, &deps);

        jobs.push(handle.job().clone());
        handles.push(handle);
    }

    for handle in handles {
        handle.join();
    }

    assert_eq!(executed.load(Ordering::SeqCst), n);

    scheduler.stop();
}

#[test]
fn unready_job_is_skipped() {
    use std::sync::mpsc;

    // A single worker has to skip the job that isn't ready to get to its dependency.
    let scheduler = seeded_scheduler(1);

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = scheduler.submit(move || { let _ = release_rx.recv(); }, &[]);

    // The worker is busy, so both of these land behind the blocker, and the
    // dependent job is the first one the worker pops afterwards.
    let dep = scheduler.submit(|| 6, &[]);
    let dependent = scheduler.submit(|| 7, &[dep.job().clone()]);

    release_tx.send(()).unwrap();

    assert_eq!(dependent.join(), 7);
    assert_eq!(dep.join(), 6);
    blocker.join();

    scheduler.stop();
}

#[test]
fn idle_worker_steals_from_blocked_worker() {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    let scheduler = seeded_scheduler(2);

    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = scheduler.submit(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    }, &[]);

    started_rx.recv().unwrap();

    // Jobs are placed in random queues, so about half of them end up behind the
    // blocker. Only the other worker can run those, by stealing them.
    let handles: Vec<_> = (0..200u32).map(|i| scheduler.submit(move || i, &[])).collect();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !handles.iter().all(|h| h.is_done()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }

    let all_done = handles.iter().all(|h| h.is_done());
    assert!(!blocker.is_done());
    release_tx.send(()).unwrap();

    assert!(all_done, "jobs queued behind a blocked worker were not stolen");
    assert!(scheduler.stats().stolen > 0);

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join(), i as u32);
    }
    blocker.join();

    scheduler.stop();
}

#[test]
fn panics_are_reported_to_the_joining_thread() {
    use crate::error::JobError;

    let scheduler = seeded_scheduler(2);

    let failing = scheduler.submit(|| -> u32 { panic!("bad image") }, &[]);
    // A job depending on a failed job still runs: failed jobs are done.
    let after = scheduler.submit(|| 1u32, &[failing.job().clone()]);

    assert_eq!(
        failing.try_join(),
        Err(JobError::Panicked { message: "bad image".to_string() }),
    );
    assert_eq!(after.join(), 1);

    // Workers survive panicking raw jobs.
    let raw = Job::new_ref(|| panic!("raw job"), &[]);
    scheduler.submit_job(raw.clone());
    let next = scheduler.submit(|| 2u32, &[raw]);
    assert_eq!(next.join(), 2);

    scheduler.stop();
}

#[test]
fn submit_group_collects_in_order() {
    let scheduler = seeded_scheduler(3);

    let handle = scheduler.submit_group(|i| i * i, 10_000, 64);
    let squares = handle.join();

    assert_eq!(squares.len(), 10_000);
    for (i, sq) in squares.iter().enumerate() {
        assert_eq!(*sq, i * i);
    }

    let empty = scheduler.submit_group(|i| i, 0, 16);
    assert!(empty.join().is_empty());

    let unchunked = scheduler.submit_group(|i| i, 5, 0);
    assert_eq!(unchunked.join(), vec![0, 1, 2, 3, 4]);

    let oversized = scheduler.submit_group(|i| i, 5, usize::MAX);
    assert_eq!(oversized.join(), vec![0, 1, 2, 3, 4]);

    scheduler.stop();
}

#[test]
fn submit_group_as_dependency() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let scheduler = seeded_scheduler(3);
    let counter = Arc::new(AtomicUsize::new(0));

    let c = counter.clone();
    let group = scheduler.submit_group(move |_| { c.fetch_add(1, Ordering::SeqCst); }, 1000, 10);

    let c = counter.clone();
    let after = scheduler.submit(move || c.load(Ordering::SeqCst), &[group.job().clone()]);

    assert_eq!(after.join(), 1000);
    assert_eq!(group.join().len(), 1000);

    scheduler.stop();
}

#[test]
fn submit_group_panics() {
    use crate::error::JobError;

    let scheduler = seeded_scheduler(2);

    let handle = scheduler.submit_group(|i| {
        if i == 77 {
            panic!("item 77");
        }
        i
    }, 100, 8);

    assert_eq!(handle.try_join(), Err(JobError::Panicked { message: "item 77".to_string() }));

    scheduler.stop();
}

#[test]
fn stop_abandons_queued_jobs() {
    use crate::error::JobError;
    use std::sync::mpsc;
    use std::time::Duration;

    let scheduler = seeded_scheduler(1);

    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let busy = scheduler.submit(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        "finished"
    }, &[]);

    started_rx.recv().unwrap();

    let queued: Vec<_> = (0..3).map(|i| scheduler.submit(move || i, &[])).collect();

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();
    });

    assert_eq!(scheduler.stop(), 3);
    releaser.join().unwrap();

    // In-flight work isn't cancelled.
    assert_eq!(busy.join(), "finished");
    for handle in queued {
        assert!(handle.is_done());
        assert_eq!(handle.try_join(), Err(JobError::Abandoned));
    }
}

#[test]
fn hooks_and_shutdown() {
    use std::sync::atomic::{AtomicU32, Ordering};

    for num_threads in 1..12 {
        let started = Arc::new(AtomicU32::new(0));
        let exited = Arc::new(AtomicU32::new(0));

        let s = started.clone();
        let e = exited.clone();
        let scheduler = Scheduler::builder()
            .with_worker_threads(num_threads)
            .with_start_handler(move |_id| { s.fetch_add(1, Ordering::SeqCst); })
            .with_exit_handler(move |_id| { e.fetch_add(1, Ordering::SeqCst); })
            .build();

        assert_eq!(scheduler.num_worker_threads(), num_threads);
        assert_eq!(scheduler.stop(), 0);

        assert_eq!(started.load(Ordering::SeqCst), num_threads);
        assert_eq!(exited.load(Ordering::SeqCst), num_threads);
    }
}

#[test]
fn drop_stops_workers() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let exited = Arc::new(AtomicU32::new(0));
    let e = exited.clone();
    {
        let _scheduler = Scheduler::builder()
            .with_worker_threads(3)
            .with_exit_handler(move |_id| { e.fetch_add(1, Ordering::SeqCst); })
            .build();
    }

    assert_eq!(exited.load(Ordering::SeqCst), 3);
}

#[test]
fn spawn_failure_is_reported() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let exited = Arc::new(AtomicU32::new(0));
    let e = exited.clone();

    // No thread can be given a stack this large.
    let result = Scheduler::builder()
        .with_worker_threads(2)
        .with_stack_size(usize::MAX)
        .with_exit_handler(move |_id| { e.fetch_add(1, Ordering::SeqCst); })
        .try_build();

    assert!(result.is_err());
    assert_eq!(exited.load(Ordering::SeqCst), 0);
}

#[test]
#[should_panic(expected = "failed to spawn worker threads")]
fn build_panics_on_spawn_failure() {
    let _scheduler = Scheduler::builder()
        .with_worker_threads(1)
        .with_stack_size(usize::MAX)
        .build();
}

#[test]
fn thread_names() {
    let scheduler = Scheduler::builder()
        .with_worker_threads(2)
        .with_thread_names(|idx| format!("decoder-{}", idx))
        .build();

    let name = scheduler.submit(|| std::thread::current().name().map(String::from), &[]).join();
    assert!(matches!(name.as_deref(), Some("decoder-0") | Some("decoder-1")));

    scheduler.stop();
}

#[test]
fn worker_count() {
    assert!(Scheduler::default_worker_count() >= 1);
    let scheduler = Scheduler::new(0);
    assert_eq!(scheduler.num_worker_threads(), 1);
    scheduler.stop();
}

#[test]
fn stats() {
    use std::time::{Duration, Instant};

    let scheduler = seeded_scheduler(2);
    let n = 1000;

    let handles: Vec<_> = (0..n).map(|i| scheduler.submit(move || i, &[])).collect();
    for handle in handles {
        handle.join();
    }

    // Workers count a job right after its output is published.
    let deadline = Instant::now() + Duration::from_secs(10);
    while scheduler.stats().jobs_executed < n && Instant::now() < deadline {
        std::thread::yield_now();
    }

    assert_eq!(scheduler.stats().jobs_executed, n);

    scheduler.stop();
}

#[test]
#[ignore]
fn grouped_submission_is_faster() {
    use std::time::Instant;

    fn work(i: usize) -> u64 {
        let mut x = i as u64;
        for _ in 0..200 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        }
        x
    }

    let n = 1_000_000;
    let scheduler = Scheduler::new(Scheduler::default_worker_count());

    let start = Instant::now();
    let serial: Vec<u64> = (0..n).map(work).collect();
    let serial_time = start.elapsed();

    let start = Instant::now();
    let handles: Vec<_> = (0..n).map(|i| scheduler.submit(move || work(i), &[])).collect();
    let individual: Vec<u64> = handles.into_iter().map(|h| h.join()).collect();
    let individual_time = start.elapsed();

    let start = Instant::now();
    let grouped = scheduler.submit_group(work, n, 4096).join();
    let grouped_time = start.elapsed();

    assert_eq!(serial, individual);
    assert_eq!(serial, grouped);
    assert!(grouped_time < individual_time, "{:?} >= {:?}", grouped_time, individual_time);
    if scheduler.num_worker_threads() > 1 {
        assert!(grouped_time < serial_time, "{:?} >= {:?}", grouped_time, serial_time);
    }

    scheduler.stop();
}
