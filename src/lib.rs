//! A parallel job scheduler with explicit dependencies between jobs.
//!
//! Jobs are submitted to a fixed set of worker threads, each with its own queue. Idle
//! workers steal from each other's queues. A job can list other jobs as dependencies,
//! in which case it only runs once they are all done. Submitting a job returns a handle
//! that can be used to retrieve its output, or as a dependency of other jobs.
//!
//! What we want:
//! - Explicit ownership of the scheduler: no implicit global thread pool and no hidden
//!   global random state.
//! - Dependencies only point from a job to its prerequisites, never the other way
//!   around, so the dependency graph can't leak through reference cycles.
//! - A failing job reports its failure to whoever joins it, and never takes a worker
//!   thread down.
//! - Cheap data-parallel loops over ranges of indices via `submit_group`.
//!
//! ```
//! use jobsys::Scheduler;
//!
//! let scheduler = Scheduler::new(3);
//!
//! let a = scheduler.submit(|| 20, &[]);
//! let b = scheduler.submit(|| 22, &[]);
//! let deps = [a.job().clone(), b.job().clone()];
//! let sum = scheduler.submit(move || a.join() + b.join(), &deps);
//!
//! assert_eq!(sum.join(), 42);
//!
//! scheduler.stop();
//! ```

mod core;
mod error;
mod group;
pub mod handle;

pub use crate::core::job::{Job, JobId, JobRef, Payload};
pub use crate::core::queue::WorkerQueue;
pub use crate::core::scheduler::{Scheduler, SchedulerBuilder};
pub use crate::core::stats::Stats;
pub use crate::core::WorkerHook;
pub use crate::core::sync;
pub use crate::error::JobError;
pub use crate::group::chunks;
pub use crate::handle::JobHandle;
