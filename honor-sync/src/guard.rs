//! Exclusive execution for sync cycles, and the chain storage lock.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A flag which makes sure a daemon runs at most one sync cycle at a time.
///
/// Overlapping cycles are skipped, not queued.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    busy: AtomicBool,
}

impl ExecutionGuard {
    /// Returns a new idle guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically marks the guard as busy.
    ///
    /// Returns `None` if another cycle already holds the guard. Otherwise,
    /// returns a token that marks the guard as idle when it is dropped.
    pub fn try_enter(&self) -> Option<ExecutionToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ExecutionToken { guard: self })
    }

    /// Returns `true` if a cycle currently holds the guard.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn leave(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Proof that the current task holds an [`ExecutionGuard`].
///
/// Dropping the token releases the guard, including during unwinding.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct ExecutionToken<'a> {
    guard: &'a ExecutionGuard,
}

impl Drop for ExecutionToken<'_> {
    fn drop(&mut self) {
        self.guard.leave();
    }
}

/// The lock that serializes every task which mutates chain storage.
///
/// Clones share the same lock. Give a clone to each daemon that writes to the
/// chain, so their mutations can't interleave.
#[derive(Clone, Debug, Default)]
pub struct StorageLock {
    mutex: Arc<Mutex<()>>,
}

impl StorageLock {
    /// Returns a new unlocked storage lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock is free, then takes it.
    ///
    /// The lock is held until the returned guard is dropped.
    pub async fn lock(&self) -> StorageLockGuard {
        StorageLockGuard {
            _guard: self.mutex.clone().lock_owned().await,
        }
    }

    /// Returns `true` if some task currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.mutex.try_lock().is_err()
    }
}

/// A held [`StorageLock`]. The lock is released when this guard is dropped.
#[derive(Debug)]
#[must_use = "the storage lock is released as soon as the guard is dropped"]
pub struct StorageLockGuard {
    _guard: OwnedMutexGuard<()>,
}
