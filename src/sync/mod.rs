/// Blocking synchronization primitives
/// The scheduler owns the wait queues, so semaphores and sleeping locks are
/// provided by it through these traits. Short critical sections inside this
/// crate use `spin::Mutex` directly and never block while holding it.
///
/// Lock ordering (outermost first):
///
/// 1. Process syscall lock
/// 2. Global filesystem lock
/// 3. `spin::Mutex` guards (thread list, tables, arena); never held across
///    a blocking call

/// Counting semaphore
pub trait Semaphore: Send + Sync {
    /// Block until the value is positive, then decrement it
    fn down(&self);

    /// Increment the value, waking one waiter
    fn up(&self);
}

/// Sleeping mutual-exclusion lock with an owner
pub trait SleepLock: Send + Sync {
    /// Block until the lock is free, then take it for the current thread
    fn acquire(&self);

    /// Release a lock held by the current thread
    fn release(&self);

    /// True if the current thread owns the lock
    fn held_by_current_thread(&self) -> bool;
}

/// Holds a `SleepLock` until dropped
pub struct SleepLockGuard<'a> {
    lock: &'a dyn SleepLock,
}

impl<'a> SleepLockGuard<'a> {
    pub fn new(lock: &'a dyn SleepLock) -> Self {
        lock.acquire();
        Self { lock }
    }
}

impl Drop for SleepLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
