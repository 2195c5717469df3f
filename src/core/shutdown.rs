/// Shutdown
///
/// Workers check whether the scheduler is shutting down by reading an atomic that is
/// set when the shutdown starts. The stop flag is never reset: a scheduler can't be
/// restarted.

use crate::sync::{Ordering, AtomicBool};

pub(crate) struct Shutdown {
    is_shutting_down: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown {
            is_shutting_down: AtomicBool::new(false),
        }
    }

    /// Returns false if the shutdown had already begun.
    pub fn begin(&self) -> bool {
        !self.is_shutting_down.swap(true, Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }
}
