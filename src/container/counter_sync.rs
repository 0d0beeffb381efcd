//! Background reconciliation of task counters with the counter service

use crate::functions::ClientError;
use crate::signal::Signal;
use crate::task::TaskWorker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Default time between two sync passes
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically syncs every task's counter client until the job stops
///
/// A failed pass (an error from any client, or a panic inside the pass)
/// restarts the loop after one interval instead of ending it. Observing
/// `stopped`, whether between passes or while backing off, ends it.
pub(crate) struct CounterSync {
    tasks: Vec<Arc<dyn TaskWorker>>,
    stopped: Signal,
    interval: Duration,
}

impl CounterSync {
    pub(crate) fn new(tasks: Vec<Arc<dyn TaskWorker>>, stopped: Signal, interval: Duration) -> Self {
        Self {
            tasks,
            stopped,
            interval,
        }
    }

    /// Runs until `stopped` is observed
    pub(crate) fn run(&self) {
        let mut restarts: u64 = 0;

        loop {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sync_until_stopped()));
            match outcome {
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    restarts += 1;
                    tracing::warn!(restarts, "Counter sync failed, restarting: {}", e);
                }
                Err(_) => {
                    restarts += 1;
                    tracing::error!(restarts, "Counter sync panicked, restarting");
                }
            }

            if self.stopped.wait(self.interval) {
                break;
            }
        }

        tracing::debug!(restarts, "Counter sync stopped");
    }

    fn sync_until_stopped(&self) -> Result<(), ClientError> {
        while !self.stopped.is_set() {
            self.sync_all()?;
            self.stopped.wait(self.interval);
        }
        Ok(())
    }

    /// Syncs every task, even after one fails; returns the first failure
    pub(crate) fn sync_all(&self) -> Result<(), ClientError> {
        let mut first_error = None;

        for task in &self.tasks {
            if let Err(e) = task.counter_client().sync() {
                tracing::debug!(task_id = task.task_id(), "Counter sync failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
