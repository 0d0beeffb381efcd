//! Budget client: how much crawl work a task slot may still perform

use crate::functions::traits::{check_job_name, BudgetHandle, ClientResult};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Per-task budget client
///
/// Units are reserved from the budget service in batches and handed out
/// locally, so a busy task does not hit the service on every page. Whatever
/// is left in the reserve when the task ends should go back through
/// [`release`](BudgetApplyClient::release).
pub struct BudgetApplyClient {
    service: BudgetHandle,
    job_name: String,
    batch: u64,
    reserve: Mutex<u64>,
}

impl BudgetApplyClient {
    /// Creates a client that reserves one unit at a time
    pub fn new(service: BudgetHandle, job_name: &str) -> ClientResult<Self> {
        check_job_name(job_name)?;
        Ok(Self {
            service,
            job_name: job_name.to_string(),
            batch: 1,
            reserve: Mutex::new(0),
        })
    }

    /// Sets how many units are reserved per service call
    pub fn with_batch(mut self, batch: u64) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Takes up to `n` units; returns how many were granted
    ///
    /// Zero means the job's budget is exhausted.
    pub fn apply(&self, n: u64) -> ClientResult<u64> {
        let mut reserve = self.lock();
        if *reserve < n {
            let wanted = (n - *reserve).max(self.batch);
            let granted = self.service.apply(&self.job_name, wanted)?;
            *reserve += granted;
        }

        let taken = n.min(*reserve);
        *reserve -= taken;
        Ok(taken)
    }

    /// Units reserved locally and not yet handed out
    pub fn remaining_reserve(&self) -> u64 {
        *self.lock()
    }

    /// Hands the unused reserve back to the service
    pub fn release(&self) -> ClientResult<()> {
        let mut reserve = self.lock();
        if *reserve > 0 {
            self.service.release(&self.job_name, *reserve)?;
            *reserve = 0;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.reserve
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for BudgetApplyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetApplyClient")
            .field("job_name", &self.job_name)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}
