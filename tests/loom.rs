//! Model checking of the queue and of job completion.
//!
//! Run with `RUSTFLAGS="--cfg loom" cargo test --test loom --release`.

#![cfg(loom)]

use jobsys::{Job, JobRef, WorkerQueue};
use loom::sync::Arc;
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::thread;

fn job() -> JobRef {
    Job::new_ref(|| {}, &[])
}

#[test]
fn pop_and_steal_take_each_job_once() {
    loom::model(|| {
        let queue = Arc::new(WorkerQueue::new());
        for _ in 0..3 {
            queue.push(job());
        }

        let thief = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut stolen = Vec::new();
                while let Some(job) = queue.steal() {
                    stolen.push(job.id());
                }
                stolen
            })
        };

        let mut seen = Vec::new();
        while let Some(job) = queue.pop() {
            seen.push(job.id());
        }

        seen.extend(thief.join().unwrap());
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);
        assert!(queue.is_empty());
    });
}

#[test]
fn push_from_another_thread() {
    loom::model(|| {
        let queue = Arc::new(WorkerQueue::new());

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                queue.push(job());
                queue.push(job());
            })
        };

        let mut popped = 0;
        while queue.pop().is_some() {
            popped += 1;
        }

        producer.join().unwrap();

        while queue.steal().is_some() {
            popped += 1;
        }

        assert_eq!(popped, 2);
    });
}

#[test]
fn finish_happens_before_ready() {
    loom::model(|| {
        let value = Arc::new(AtomicUsize::new(0));
        let dep = job();
        let dependent = Job::new_ref(|| {}, &[dep.clone()]);

        let producer = {
            let value = value.clone();
            thread::spawn(move || {
                value.store(42, Ordering::Relaxed);
                dep.finish();
            })
        };

        if dependent.ready() {
            assert_eq!(value.load(Ordering::Relaxed), 42);
        }

        producer.join().unwrap();

        assert!(dependent.ready());
    });
}
