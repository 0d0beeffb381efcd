//! Builds the coordination client triple for one task slot

use crate::functions::budget::BudgetApplyClient;
use crate::functions::counter::CounterClient;
use crate::functions::speed::SpeedControlClient;
use crate::functions::traits::{BudgetHandle, ClientResult, CounterHandle, SpeedHandle};
use std::sync::Arc;

/// The three clients a task uses to talk to the rest of the cluster
#[derive(Debug, Clone)]
pub struct ClientSet {
    pub counter: Arc<CounterClient>,
    pub budget: Arc<BudgetApplyClient>,
    pub speed: Arc<SpeedControlClient>,
}

/// Produces per-slot clients for one job on one node
#[derive(Debug, Clone)]
pub struct RemoteClientFactory {
    job_name: String,
    ip: String,
    budget_batch: u64,
}

impl RemoteClientFactory {
    pub fn new(job_name: &str, ip: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            ip: ip.to_string(),
            budget_batch: 1,
        }
    }

    /// Sets how many budget units each budget client reserves at a time
    pub fn with_budget_batch(mut self, batch: u64) -> Self {
        self.budget_batch = batch;
        self
    }

    /// Builds the clients for the task with global id `task_id`
    pub fn build(
        &self,
        task_id: u32,
        counter: &CounterHandle,
        budget: &BudgetHandle,
        speed: &SpeedHandle,
    ) -> ClientResult<ClientSet> {
        let counter = CounterClient::new(Arc::clone(counter), &self.job_name)?;
        let budget = BudgetApplyClient::new(Arc::clone(budget), &self.job_name)?
            .with_batch(self.budget_batch);
        let speed = SpeedControlClient::new(Arc::clone(speed), &self.ip, task_id, &self.job_name)?;

        Ok(ClientSet {
            counter: Arc::new(counter),
            budget: Arc::new(budget),
            speed: Arc::new(speed),
        })
    }
}
