pub use std::sync::atomic::Ordering;

#[cfg(not(loom))] pub use std::{
    sync::{
        Arc, Mutex, MutexGuard, Condvar,
        atomic::{AtomicBool, AtomicU64},
    },
    thread,
};


#[cfg(loom)] pub use loom::{
    sync::{
        Arc, Mutex, MutexGuard, Condvar,
        atomic::{AtomicBool, AtomicU64},
    },
    thread
};

/// Lock a mutex, ignoring poisoning.
///
/// Job payloads never run while one of the scheduler's locks is held, so a poisoned
/// lock can only come from a panic in the scheduler's own bookkeeping, which leaves
/// the protected data consistent.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
