//! Handles are references to submitted work.
//!
//! They consist of:
//!  - A strong reference to the job, so that it can be used as a dependency of other jobs,
//!  - A reference counted slot where the output of the job will be written.
//!
//! The job's payload owns the other side of the slot (a `Completer`). When the payload
//! runs, the completer writes the output and wakes up whoever is waiting. If the payload
//! is dropped without running, the completer marks the slot as abandoned instead so
//! that waiting on it doesn't block forever.

use std::any::Any;
use std::fmt;
use std::panic;

use crate::core::job::JobRef;
use crate::error::JobError;
use crate::sync::{Arc, Mutex, Condvar, lock};

type Panic = Box<dyn Any + Send + 'static>;

enum SlotState<T> {
    Pending,
    Ready(Result<T, Panic>),
    Abandoned,
}

/// A synchronized slot where the output of a job is placed.
pub(crate) struct ResultSlot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

impl<T> ResultSlot<T> {
    fn new() -> Self {
        ResultSlot {
            state: Mutex::new(SlotState::Pending),
            cond: Condvar::new(),
        }
    }

    fn set(&self, value: SlotState<T>) {
        let mut state = lock(&self.state);
        debug_assert!(matches!(*state, SlotState::Pending));
        *state = value;
        self.cond.notify_all();
    }

    fn is_set(&self) -> bool {
        !matches!(*lock(&self.state), SlotState::Pending)
    }

    fn wait(&self) {
        let mut state = lock(&self.state);
        while let SlotState::Pending = *state {
            state = match self.cond.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until the slot is set and move the output out.
    fn take(&self) -> Option<Result<T, Panic>> {
        let mut state = lock(&self.state);
        loop {
            match std::mem::replace(&mut *state, SlotState::Abandoned) {
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    state = match self.cond.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
                SlotState::Ready(result) => return Some(result),
                SlotState::Abandoned => return None,
            }
        }
    }
}

/// The producing side of a result slot, moved into the job's payload.
pub(crate) struct Completer<T> {
    slot: Option<Arc<ResultSlot<T>>>,
}

impl<T> Completer<T> {
    /// Run the function, capturing a panic if any, and publish its output.
    pub fn complete_with<F>(mut self, function: F)
    where F: FnOnce() -> T
    {
        let result = panic::catch_unwind(panic::AssertUnwindSafe(function));
        if let Some(slot) = self.slot.take() {
            slot.set(SlotState::Ready(result));
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        // Dropped without having run: the job was abandoned.
        if let Some(slot) = self.slot.take() {
            slot.set(SlotState::Abandoned);
        }
    }
}

pub(crate) fn result_slot<T>() -> (Completer<T>, Arc<ResultSlot<T>>) {
    let slot = Arc::new(ResultSlot::new());
    (Completer { slot: Some(slot.clone()) }, slot)
}

/// The receipt of a submitted job.
///
/// `join` consumes the handle, so the output can only be retrieved once.
pub struct JobHandle<Output> {
    job: JobRef,
    output: Arc<ResultSlot<Output>>,
}

impl<Output> JobHandle<Output> {
    pub(crate) fn new(job: JobRef, output: Arc<ResultSlot<Output>>) -> Self {
        JobHandle { job, output }
    }

    /// The submitted job.
    ///
    /// Clone it into the dependency list of other submissions to make them run after
    /// this one.
    pub fn job(&self) -> &JobRef {
        &self.job
    }

    /// Returns true if the output (or the failure) is available.
    ///
    /// The output is published right before the scheduler marks the job done, so this
    /// can briefly be true while `job().is_done()` is still false.
    pub fn is_done(&self) -> bool {
        self.output.is_set()
    }

    /// Block until the output is available, without consuming it.
    pub fn wait(&self) {
        self.output.wait();
    }

    /// Block until the job has run and return its output.
    ///
    /// If the job panicked, the panic is resumed on the calling thread. Panics if the
    /// job was abandoned because the scheduler stopped before running it.
    pub fn join(self) -> Output {
        match self.output.take() {
            Some(Ok(output)) => output,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("{}", JobError::Abandoned),
        }
    }

    /// Block until the job has run and return its output, or why it has none.
    pub fn try_join(self) -> Result<Output, JobError> {
        match self.output.take() {
            Some(Ok(output)) => Ok(output),
            Some(Err(payload)) => Err(JobError::from_panic(&*payload)),
            None => Err(JobError::Abandoned),
        }
    }
}

impl<Output> fmt::Debug for JobHandle<Output> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.job.id())
            .field("is_done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
fn handle_with<T, F>(function: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (completer, slot) = result_slot();
    let job = crate::core::job::Job::new_ref(move || completer.complete_with(function), &[]);
    JobHandle::new(job, slot)
}

#[test]
fn join_after_invoke() {
    let handle = handle_with(|| 40 + 2);
    assert!(!handle.is_done());

    handle.job().invoke();

    assert!(handle.is_done());
    assert_eq!(handle.join(), 42);
}

#[test]
fn join_blocks_until_completion() {
    let handle = handle_with(|| "done".to_string());
    let job = handle.job().clone();

    let runner = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        job.invoke();
    });

    assert_eq!(handle.join(), "done");
    runner.join().unwrap();
}

#[test]
fn wait_does_not_consume_output() {
    let handle = handle_with(|| vec![1u8, 2, 3]);
    let job = handle.job().clone();

    let runner = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        job.invoke();
    });

    handle.wait();
    assert!(handle.is_done());
    // Waiting again returns immediately.
    handle.wait();

    assert_eq!(handle.join(), vec![1, 2, 3]);
    runner.join().unwrap();
}

#[test]
fn wait_returns_on_abandon() {
    let handle = handle_with(|| 1u32);
    handle.job().abandon();

    handle.wait();
    assert_eq!(handle.try_join(), Err(JobError::Abandoned));
}

#[test]
fn try_join_reports_panics() {
    let handle = handle_with(|| -> u32 { panic!("decode failed") });
    handle.job().invoke();

    assert_eq!(
        handle.try_join(),
        Err(JobError::Panicked { message: "decode failed".to_string() }),
    );
}

#[test]
#[should_panic(expected = "decode failed")]
fn join_resumes_panics() {
    let handle = handle_with(|| -> u32 { panic!("decode failed") });
    handle.job().invoke();
    handle.join();
}

#[test]
fn abandoned_job() {
    let handle = handle_with(|| 1u32);
    assert!(handle.job().abandon());

    assert!(handle.is_done());
    assert_eq!(handle.try_join(), Err(JobError::Abandoned));
}

#[test]
#[should_panic(expected = "abandoned")]
fn join_abandoned_job_panics() {
    let handle = handle_with(|| 1u32);
    handle.job().abandon();
    handle.join();
}
