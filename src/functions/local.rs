//! In-process coordination services
//!
//! Used when a job runs in local mode (every task on one machine) and by
//! tests. Each service keeps its state per job name.

use crate::functions::counter::{merge_into, CounterSnapshot};
use crate::functions::traits::{BudgetService, ClientResult, CounterService, SpeedService};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Job-wide counter totals
#[derive(Debug, Default)]
pub struct LocalCounterService {
    totals: Mutex<HashMap<String, CounterSnapshot>>,
}

impl LocalCounterService {
    pub fn new() -> Self {
        Self::default()
    }

    /// All totals recorded for `job`
    pub fn totals(&self, job: &str) -> CounterSnapshot {
        lock(&self.totals).get(job).cloned().unwrap_or_default()
    }

    /// A single total
    pub fn get(&self, job: &str, group: &str, item: &str) -> u64 {
        lock(&self.totals)
            .get(job)
            .and_then(|groups| groups.get(group))
            .and_then(|items| items.get(item))
            .copied()
            .unwrap_or(0)
    }
}

impl CounterService for LocalCounterService {
    fn merge(&self, job: &str, deltas: &CounterSnapshot) -> ClientResult<CounterSnapshot> {
        let mut totals = lock(&self.totals);
        let job_totals = totals.entry(job.to_string()).or_default();
        merge_into(job_totals, deltas);
        Ok(job_totals.clone())
    }
}

/// Fixed-size budget shared by every task of a job
#[derive(Debug)]
pub struct LocalBudgetService {
    /// Total units per job; `None` is unlimited
    size: Option<u64>,
    used: Mutex<HashMap<String, u64>>,
}

impl LocalBudgetService {
    pub fn new(size: Option<u64>) -> Self {
        Self {
            size,
            used: Mutex::new(HashMap::new()),
        }
    }

    /// Units granted and not released for `job`
    pub fn used(&self, job: &str) -> u64 {
        lock(&self.used).get(job).copied().unwrap_or(0)
    }
}

impl BudgetService for LocalBudgetService {
    fn apply(&self, job: &str, requested: u64) -> ClientResult<u64> {
        let mut guard = lock(&self.used);
        let used = guard.entry(job.to_string()).or_insert(0);

        let granted = match self.size {
            Some(size) => requested.min(size.saturating_sub(*used)),
            None => requested,
        };
        *used += granted;
        Ok(granted)
    }

    fn release(&self, job: &str, unused: u64) -> ClientResult<()> {
        if let Some(used) = lock(&self.used).get_mut(job) {
            *used = used.saturating_sub(unused);
        }
        Ok(())
    }
}

const SPEED_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct SpeedWindow {
    started: Instant,
    count: u32,
}

impl SpeedWindow {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            count: 0,
        }
    }

    fn maybe_reset(&mut self) {
        if self.started.elapsed() >= SPEED_WINDOW {
            self.started = Instant::now();
            self.count = 0;
        }
    }
}

#[derive(Debug, Default)]
struct SpeedState {
    windows: HashMap<String, SpeedWindow>,
    requesters: HashMap<String, BTreeSet<(String, u32)>>,
}

/// Fixed one-second window shared by every task of a job
#[derive(Debug)]
pub struct LocalSpeedService {
    /// Permits per second per job; `None` is unlimited
    max_per_second: Option<u32>,
    state: Mutex<SpeedState>,
}

impl LocalSpeedService {
    pub fn new(max_per_second: Option<u32>) -> Self {
        Self {
            max_per_second,
            state: Mutex::new(SpeedState::default()),
        }
    }

    /// Every (ip, task id) that has asked for permits for `job`
    pub fn requesters(&self, job: &str) -> Vec<(String, u32)> {
        lock(&self.state)
            .requesters
            .get(job)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl SpeedService for LocalSpeedService {
    fn require(&self, job: &str, ip: &str, task_id: u32, requested: u32) -> ClientResult<u32> {
        let mut state = lock(&self.state);
        state
            .requesters
            .entry(job.to_string())
            .or_default()
            .insert((ip.to_string(), task_id));

        let Some(max) = self.max_per_second else {
            return Ok(requested);
        };

        let window = state
            .windows
            .entry(job.to_string())
            .or_insert_with(SpeedWindow::new);
        window.maybe_reset();

        let granted = requested.min(max.saturating_sub(window.count));
        window.count += granted;
        Ok(granted)
    }
}
