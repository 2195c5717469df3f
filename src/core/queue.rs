use std::collections::VecDeque;

use super::sync::{Mutex, lock};
use super::job::JobRef;

/// A per-worker double-ended queue of pending jobs.
///
/// The owning worker pushes and pops at the back while thieves take from the front,
/// so the owner and the thieves work on opposite ends. Any thread can push.
///
/// Every operation takes the queue's lock.
pub struct WorkerQueue {
    jobs: Mutex<VecDeque<JobRef>>,
}

impl WorkerQueue {
    pub fn new() -> Self {
        WorkerQueue {
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a job at the owner's end.
    pub fn push(&self, job: JobRef) {
        lock(&self.jobs).push_back(job);
    }

    /// Put a job that isn't ready yet back at the far end of the queue.
    ///
    /// The owner will pop everything else that is in its queue before seeing
    /// this job again.
    pub fn push_deferred(&self, job: JobRef) {
        lock(&self.jobs).push_front(job);
    }

    /// Remove the most recently pushed job.
    ///
    /// Must only be called by the worker that owns the queue.
    pub fn pop(&self) -> Option<JobRef> {
        lock(&self.jobs).pop_back()
    }

    /// Remove the oldest job.
    pub fn steal(&self) -> Option<JobRef> {
        lock(&self.jobs).pop_front()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.jobs).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    /// Remove all jobs.
    pub(crate) fn drain(&self) -> Vec<JobRef> {
        lock(&self.jobs).drain(..).collect()
    }
}

impl Default for WorkerQueue {
    fn default() -> Self {
        WorkerQueue::new()
    }
}

#[cfg(test)]
fn empty_job() -> JobRef {
    crate::core::job::Job::new_ref(|| {}, &[])
}

#[test]
fn pop_and_steal_use_opposite_ends() {
    let queue = WorkerQueue::new();
    let jobs: Vec<JobRef> = (0..3).map(|_| empty_job()).collect();
    for j in &jobs {
        queue.push(j.clone());
    }

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.pop().unwrap().id(), jobs[2].id());
    assert_eq!(queue.steal().unwrap().id(), jobs[0].id());
    assert_eq!(queue.pop().unwrap().id(), jobs[1].id());
    assert!(queue.is_empty());
    assert!(queue.pop().is_none());
    assert!(queue.steal().is_none());
}

#[test]
fn deferred_jobs_are_popped_last() {
    let queue = WorkerQueue::new();
    let a = empty_job();
    let b = empty_job();
    queue.push(a.clone());
    queue.push(b.clone());

    let first = queue.pop().unwrap();
    assert_eq!(first.id(), b.id());
    queue.push_deferred(first);

    assert_eq!(queue.pop().unwrap().id(), a.id());
    assert_eq!(queue.pop().unwrap().id(), b.id());
}

#[test]
fn concurrent_steal_loses_nothing() {
    use std::collections::HashSet;
    use std::sync::Arc;

    let queue = Arc::new(WorkerQueue::new());
    let num_jobs = 10_000;
    let mut expected = HashSet::new();
    for _ in 0..num_jobs {
        let j = empty_job();
        expected.insert(j.id());
        queue.push(j);
    }

    let thieves: Vec<_> = (0..3).map(|_| {
        let queue = queue.clone();
        std::thread::spawn(move || {
            let mut stolen = Vec::new();
            while let Some(j) = queue.steal() {
                stolen.push(j.id());
            }
            stolen
        })
    }).collect();

    let mut seen = HashSet::new();
    while let Some(j) = queue.pop() {
        assert!(seen.insert(j.id()));
    }

    for thief in thieves {
        for id in thief.join().unwrap() {
            assert!(seen.insert(id));
        }
    }

    assert_eq!(seen, expected);
}
