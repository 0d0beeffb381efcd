//! Coordination service contracts and error types
//!
//! Each task talks to three cluster-wide services through its own clients.
//! The services are reached through the handles below; how a handle reaches
//! the real service (in-process or over the network) is up to the handle.

use crate::functions::counter::CounterSnapshot;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while talking to a coordination service
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Job name cannot be empty")]
    InvalidJobName,

    #[error("{service} service unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },
}

/// Result type for coordination client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Distributed progress counters
pub trait CounterService: Send + Sync {
    /// Adds `deltas` to the job's totals and returns the updated totals
    fn merge(&self, job: &str, deltas: &CounterSnapshot) -> ClientResult<CounterSnapshot>;
}

/// Cluster-wide crawl budget
pub trait BudgetService: Send + Sync {
    /// Requests `requested` units; returns how many were granted (possibly 0)
    fn apply(&self, job: &str, requested: u64) -> ClientResult<u64>;

    /// Returns units that were granted but never used
    fn release(&self, job: &str, unused: u64) -> ClientResult<()>;
}

/// Cluster-wide crawl speed control
pub trait SpeedService: Send + Sync {
    /// Requests `requested` fetch permits for one task; returns how many were granted
    fn require(&self, job: &str, ip: &str, task_id: u32, requested: u32) -> ClientResult<u32>;
}

/// Handle to a task slot's counter service
pub type CounterHandle = Arc<dyn CounterService>;

/// Handle to a task slot's budget service
pub type BudgetHandle = Arc<dyn BudgetService>;

/// Handle to a task slot's speed service
pub type SpeedHandle = Arc<dyn SpeedService>;

pub(crate) fn check_job_name(job_name: &str) -> ClientResult<()> {
    if job_name.trim().is_empty() {
        return Err(ClientError::InvalidJobName);
    }
    Ok(())
}
