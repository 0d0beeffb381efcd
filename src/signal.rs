//! Shared control signals
//!
//! A [`Signal`] is a settable, clearable event that any number of threads may
//! poll or wait on. The container and its tasks receive the job's `stopped`
//! and `nonsuspend` signals explicitly; only the owner of a signal sets it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    flag: Mutex<bool>,
    cond: Condvar,
}

/// Cloneable event flag; every clone observes the same state
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    /// Creates an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes every waiter
    pub fn set(&self) {
        let mut flag = self.lock();
        *flag = true;
        self.inner.cond.notify_all();
    }

    /// Clears the signal
    pub fn clear(&self) {
        *self.lock() = false;
    }

    /// Returns whether the signal is currently set
    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Blocks until the signal is set or `timeout` elapses
    ///
    /// Returns `true` if the signal was set when the wait ended. Setting the
    /// signal wakes the waiter immediately.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.lock();
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            flag = match self.inner.cond.wait_timeout(flag, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *flag
    }

    /// Blocks until the signal is set
    pub fn wait_forever(&self) {
        let mut flag = self.lock();
        while !*flag {
            flag = match self.inner.cond.wait(flag) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    // A bool cannot be left half-written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
