//! Creation lock with a debug-only reentrancy detector.
//!
//! The creation lock is held while a factory runs. A factory that calls back
//! into the same cache's creation path from the same thread would deadlock.
//! In debug builds the lock records its owning thread and panics on such
//! nested entry instead. In release builds this is a plain mutex.

use parking_lot::{Mutex, MutexGuard};
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
fn thread_tag() -> usize {
    thread_local! {
        static TAG: u8 = const { 0 };
    }
    // Address of a thread-local is unique among live threads and never zero.
    TAG.with(|t| t as *const u8 as usize)
}

#[derive(Debug, Default)]
pub(crate) struct CreateLock {
    lock: Mutex<()>,
    #[cfg(debug_assertions)]
    owner: AtomicUsize,
}

impl CreateLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock. In debug builds, panics if the current thread
    /// already holds it.
    #[inline]
    pub(crate) fn lock(&self) -> CreateGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let me = thread_tag();
            assert!(
                self.owner.load(Ordering::Acquire) != me,
                "reentrant create: factory called back into the same cache"
            );
            let guard = self.lock.lock();
            self.owner.store(me, Ordering::Release);
            return CreateGuard {
                _guard: guard,
                owner: &self.owner,
            };
        }

        #[cfg(not(debug_assertions))]
        {
            return CreateGuard {
                _guard: self.lock.lock(),
            };
        }
    }
}

/// RAII guard returned by `CreateLock::lock`.
pub(crate) struct CreateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    #[cfg(debug_assertions)]
    owner: &'a AtomicUsize,
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        // Runs before the mutex guard field is dropped.
        #[cfg(debug_assertions)]
        self.owner.store(0, Ordering::Release);
    }
}
