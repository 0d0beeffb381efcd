//! Speed control client: per-task crawl rate throttling

use crate::functions::traits::{check_job_name, ClientResult, SpeedHandle};
use crate::signal::Signal;
use std::fmt;
use std::time::Duration;

const MIN_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Per-task speed control client, identified to the service by node IP and task id
pub struct SpeedControlClient {
    service: SpeedHandle,
    ip: String,
    task_id: u32,
    job_name: String,
}

impl SpeedControlClient {
    pub fn new(service: SpeedHandle, ip: &str, task_id: u32, job_name: &str) -> ClientResult<Self> {
        check_job_name(job_name)?;
        Ok(Self {
            service,
            ip: ip.to_string(),
            task_id,
            job_name: job_name.to_string(),
        })
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn task_id(&self) -> u32 {
        self.task_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Asks for `n` permits once; returns how many were granted
    pub fn require(&self, n: u32) -> ClientResult<u32> {
        self.service
            .require(&self.job_name, &self.ip, self.task_id, n)
    }

    /// Blocks until `n` permits are granted or `stopped` is set
    ///
    /// Returns `false` if the wait ended because of `stopped`. Retries back
    /// off exponentially between 50ms and 1s.
    pub fn acquire(&self, n: u32, stopped: &Signal) -> ClientResult<bool> {
        let mut granted = 0;
        let mut backoff = MIN_BACKOFF;

        loop {
            if stopped.is_set() {
                return Ok(false);
            }

            granted += self.require(n - granted)?;
            if granted >= n {
                return Ok(true);
            }

            if stopped.wait(backoff) {
                return Ok(false);
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

impl fmt::Debug for SpeedControlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeedControlClient")
            .field("ip", &self.ip)
            .field("task_id", &self.task_id)
            .field("job_name", &self.job_name)
            .finish_non_exhaustive()
    }
}
