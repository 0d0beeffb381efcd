//! Counter client: local progress counts reconciled with the counter service

use crate::functions::traits::{check_job_name, ClientResult, CounterHandle};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Counts keyed by group, then item (e.g. `pages` / `fetched`)
pub type CounterSnapshot = BTreeMap<String, BTreeMap<String, u64>>;

/// Adds every count in `deltas` to `target`
pub fn merge_into(target: &mut CounterSnapshot, deltas: &CounterSnapshot) {
    for (group, items) in deltas {
        let entry = target.entry(group.clone()).or_default();
        for (item, value) in items {
            *entry.entry(item.clone()).or_insert(0) += value;
        }
    }
}

#[derive(Debug, Default)]
struct CounterState {
    /// Counts recorded since the last successful sync
    pending: CounterSnapshot,

    /// Job-wide totals as of the last successful sync
    global: CounterSnapshot,

    last_synced: Option<DateTime<Utc>>,
}

/// Per-task counter client
///
/// The owning task increments counts while the container's sync loop
/// periodically calls [`sync`](CounterClient::sync) from another thread. The
/// lock is never held across the remote call, so increments are not blocked
/// by a slow service.
pub struct CounterClient {
    service: CounterHandle,
    job_name: String,
    state: Mutex<CounterState>,
}

impl CounterClient {
    /// Creates a client bound to one counter handle and job
    pub fn new(service: CounterHandle, job_name: &str) -> ClientResult<Self> {
        check_job_name(job_name)?;
        Ok(Self {
            service,
            job_name: job_name.to_string(),
            state: Mutex::new(CounterState::default()),
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Records `value` more of `group`/`item`
    pub fn inc(&self, group: &str, item: &str, value: u64) {
        let mut state = self.lock();
        *state
            .pending
            .entry(group.to_string())
            .or_default()
            .entry(item.to_string())
            .or_insert(0) += value;
    }

    /// Count recorded locally and not yet synced
    pub fn pending(&self, group: &str, item: &str) -> u64 {
        lookup(&self.lock().pending, group, item)
    }

    /// Job-wide total as of the last successful sync
    pub fn global(&self, group: &str, item: &str) -> u64 {
        lookup(&self.lock().global, group, item)
    }

    /// Time of the last successful sync
    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.lock().last_synced
    }

    /// Pushes pending counts to the service and pulls the job totals
    ///
    /// If the service fails, or panics, the pushed counts are put back into
    /// the pending set, so a later sync delivers them.
    pub fn sync(&self) -> ClientResult<()> {
        let mut unsent = Unsent {
            client: self,
            deltas: std::mem::take(&mut self.lock().pending),
            delivered: false,
        };

        let totals = self.service.merge(&self.job_name, &unsent.deltas)?;
        unsent.delivered = true;

        let mut state = self.lock();
        state.global = totals;
        state.last_synced = Some(Utc::now());
        Ok(())
    }

    // Counts stay consistent even if a holder panicked mid-update.
    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for CounterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterClient")
            .field("job_name", &self.job_name)
            .finish_non_exhaustive()
    }
}

/// Deltas taken out for one sync; returned to pending unless delivered
struct Unsent<'a> {
    client: &'a CounterClient,
    deltas: CounterSnapshot,
    delivered: bool,
}

impl Drop for Unsent<'_> {
    fn drop(&mut self) {
        if !self.delivered {
            merge_into(&mut self.client.lock().pending, &self.deltas);
        }
    }
}

fn lookup(snapshot: &CounterSnapshot, group: &str, item: &str) -> u64 {
    snapshot
        .get(group)
        .and_then(|items| items.get(item))
        .copied()
        .unwrap_or(0)
}
