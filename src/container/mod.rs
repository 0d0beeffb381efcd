//! Container: one node's slice of a crawl job
//!
//! A container owns a fixed pool of task workers, one per slot, and the
//! background loop that keeps their counters in step with the cluster. Its
//! lifecycle is `Uninitialized -> Initialized -> Running -> Stopped` and never
//! goes back; a container serves exactly one job assignment.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sumi_swarm::functions::{LocalBudgetService, LocalCounterService, LocalSpeedService};
//! use sumi_swarm::mq::LocalMessageQueue;
//! use sumi_swarm::{Container, ContainerParams, Env, Signal};
//!
//! let stopped = Signal::new();
//! let params = ContainerParams {
//!     container_id: 0,
//!     working_dir: "/tmp/sumi/wiki".into(),
//!     mq: Arc::new(LocalMessageQueue::new()),
//!     job_path: "jobs/wiki".into(),
//!     env: Env::new(),
//!     job_name: "wiki".to_string(),
//!     counters: vec![Arc::new(LocalCounterService::new())],
//!     budgets: vec![Arc::new(LocalBudgetService::new(None))],
//!     speeds: vec![Arc::new(LocalSpeedService::new(None))],
//!     stopped: stopped.clone(),
//!     nonsuspend: Signal::new(),
//!     n_tasks: 1,
//!     is_local: true,
//!     master_ip: None,
//!     logger: None,
//!     task_start_id: 0,
//! };
//!
//! let container = Container::new(params).unwrap();
//! container.run(false).unwrap();
//! stopped.set();
//! container.wait_for_stop().unwrap();
//! ```

mod counter_sync;

pub use counter_sync::DEFAULT_SYNC_INTERVAL;

use crate::config::{compute_job_hash, import_job_desc, Env, JobDesc};
use crate::container::counter_sync::CounterSync;
use crate::functions::{BudgetHandle, ClientSet, CounterHandle, RemoteClientFactory, SpeedHandle};
use crate::logging::{get_logger, JobLogger, JOB_LOG_FILE};
use crate::mq::MessageQueueHandle;
use crate::net::{IpResolver, SystemIpResolver};
use crate::signal::Signal;
use crate::task::{CrawlTaskBuilder, TaskBuilder, TaskContext, TaskWorker};
use crate::{ContainerError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Everything a container is constructed with, supplied by its owner
pub struct ContainerParams {
    pub container_id: u32,

    /// Root for the job log and the per-task directories
    pub working_dir: PathBuf,

    /// Queue shared by every task of the job
    pub mq: MessageQueueHandle,

    /// Job descriptor location, loaded at construction
    pub job_path: PathBuf,

    /// Job environment; `ip` overrides node IP discovery
    pub env: Env,

    pub job_name: String,

    /// Counter handle per local slot
    pub counters: Vec<CounterHandle>,

    /// Budget handle per local slot
    pub budgets: Vec<BudgetHandle>,

    /// Speed handle per local slot
    pub speeds: Vec<SpeedHandle>,

    /// Job shutdown signal, set by the owner
    pub stopped: Signal,

    /// Set while tasks must not suspend
    pub nonsuspend: Signal,

    pub n_tasks: usize,

    pub is_local: bool,

    /// Coordinating node, for log shipping
    pub master_ip: Option<String>,

    /// Logger to reuse instead of creating one at init
    pub logger: Option<JobLogger>,

    /// Global id of slot 0
    pub task_start_id: u32,
}

/// Lifecycle phase of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPhase {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// A thread that has been built but not spawned yet
///
/// The body is only taken by the spawned thread, so after a failed spawn it
/// is still here and the start can be retried.
struct PendingThread {
    name: String,
    body: Arc<Mutex<Option<ThreadBody>>>,
}

impl PendingThread {
    fn new(name: String, body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            body: Arc::new(Mutex::new(Some(Box::new(body)))),
        }
    }

    fn start(&self) -> Result<JoinHandle<()>> {
        self.spawn_with(thread::Builder::new().name(self.name.clone()))
            .map_err(|source| ContainerError::Spawn {
                name: self.name.clone(),
                source,
            })
    }

    fn spawn_with(&self, builder: thread::Builder) -> io::Result<JoinHandle<()>> {
        let slot = Arc::clone(&self.body);
        builder.spawn(move || {
            let body = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
            if let Some(body) = body {
                body();
            }
        })
    }
}

struct ContainerState {
    phase: ContainerPhase,
    logger: Option<JobLogger>,
    tasks: Vec<Arc<dyn TaskWorker>>,
    pending: Vec<PendingThread>,
    running: Vec<(String, JoinHandle<()>)>,

    /// Set while one `wait_for_stop` caller joins `running`
    joining: bool,
}

/// Per-node execution container for one job
pub struct Container {
    container_id: u32,
    working_dir: PathBuf,
    mq: MessageQueueHandle,
    job_path: PathBuf,
    job_desc: Arc<JobDesc>,
    env: Arc<Env>,
    job_name: String,
    counters: Vec<CounterHandle>,
    budgets: Vec<BudgetHandle>,
    speeds: Vec<SpeedHandle>,
    stopped: Signal,
    nonsuspend: Signal,
    n_tasks: usize,
    is_local: bool,
    master_ip: Option<String>,
    supplied_logger: Option<JobLogger>,
    task_start_id: u32,
    ip: String,
    sync_interval: Duration,
    task_builder: Arc<dyn TaskBuilder>,

    /// Guards the one-time initialization and the thread handles
    state: Mutex<ContainerState>,

    /// Notified when the started threads have all been joined
    joined: Condvar,
}

impl Container {
    /// Creates a container, discovering the node IP unless `env` has `ip`
    ///
    /// Loads the job descriptor; a descriptor that cannot be loaded is fatal.
    /// No thread is started until [`run`](Container::run).
    pub fn new(params: ContainerParams) -> Result<Self> {
        Self::with_resolver(params, &SystemIpResolver)
    }

    /// Like [`new`](Container::new) with an explicit IP resolver
    ///
    /// The resolver is consulted at most once, and only when `env` has no
    /// non-empty `ip` entry.
    pub fn with_resolver(params: ContainerParams, resolver: &dyn IpResolver) -> Result<Self> {
        let job_desc = import_job_desc(&params.job_path)?;

        let ip = match params.env.get("ip").filter(|ip| !ip.is_empty()) {
            Some(ip) => ip.clone(),
            None => resolver.resolve(),
        };

        Ok(Self {
            container_id: params.container_id,
            working_dir: params.working_dir,
            mq: params.mq,
            job_path: params.job_path,
            job_desc: Arc::new(job_desc),
            env: Arc::new(params.env),
            job_name: params.job_name,
            counters: params.counters,
            budgets: params.budgets,
            speeds: params.speeds,
            stopped: params.stopped,
            nonsuspend: params.nonsuspend,
            n_tasks: params.n_tasks,
            is_local: params.is_local,
            master_ip: params.master_ip,
            supplied_logger: params.logger,
            task_start_id: params.task_start_id,
            ip,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            task_builder: Arc::new(CrawlTaskBuilder),
            state: Mutex::new(ContainerState {
                phase: ContainerPhase::Uninitialized,
                logger: None,
                tasks: Vec::new(),
                pending: Vec::new(),
                running: Vec::new(),
                joining: false,
            }),
            joined: Condvar::new(),
        })
    }

    /// Sets the time between counter sync passes
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Replaces the default [`CrawlTaskBuilder`]
    pub fn with_task_builder(mut self, builder: impl TaskBuilder + 'static) -> Self {
        self.task_builder = Arc::new(builder);
        self
    }

    pub fn container_id(&self) -> u32 {
        self.container_id
    }

    /// Node address, resolved once at construction
    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_desc(&self) -> &JobDesc {
        &self.job_desc
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn n_tasks(&self) -> usize {
        self.n_tasks
    }

    /// Path of the job log file under the working directory
    pub fn log_file(&self) -> PathBuf {
        self.working_dir.join(JOB_LOG_FILE)
    }

    /// Directory of the task with global id `task_id`
    pub fn task_dir(&self, task_id: u32) -> PathBuf {
        self.working_dir.join(task_id.to_string())
    }

    pub fn phase(&self) -> ContainerPhase {
        self.lock_state().phase
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() != ContainerPhase::Uninitialized
    }

    /// Threads started and not yet joined
    pub fn running_threads(&self) -> usize {
        self.lock_state().running.len()
    }

    /// Global ids of the built tasks, in slot order
    pub fn task_ids(&self) -> Vec<u32> {
        self.lock_state().tasks.iter().map(|t| t.task_id()).collect()
    }

    /// The logger in use once initialized
    pub fn logger(&self) -> Option<JobLogger> {
        self.lock_state().logger.clone()
    }

    /// Builds clients, tasks and the counter sync loop, exactly once
    ///
    /// Safe to call from several threads; only the first successful call does
    /// any work. A failed call leaves the container uninitialized so it can
    /// be retried; anything built before the failure is dropped.
    pub fn init(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.phase != ContainerPhase::Uninitialized {
            return Ok(());
        }

        let logger = match &self.supplied_logger {
            Some(logger) => logger.clone(),
            None => get_logger(&self.log_file(), self.master_ip.as_deref())?,
        };

        let (tasks, mut pending) = logger.in_scope(|| {
            self.log_init();
            let clients = self.init_clients()?;
            self.init_tasks(clients, &logger)
        })?;
        pending.push(self.init_counter_sync(&tasks, &logger));

        state.logger = Some(logger);
        state.tasks = tasks;
        state.pending = pending;
        state.phase = ContainerPhase::Initialized;
        Ok(())
    }

    fn log_init(&self) {
        let job_hash = compute_job_hash(&self.job_path).unwrap_or_else(|e| {
            tracing::debug!("Could not hash job descriptor: {}", e);
            String::from("unknown")
        });

        tracing::info!(
            container_id = self.container_id,
            ip = %self.ip,
            n_tasks = self.n_tasks,
            task_start_id = self.task_start_id,
            job_hash = %job_hash,
            "Initializing container for job {}",
            self.job_name
        );
    }

    /// One client triple per slot, bound to that slot's handles
    fn init_clients(&self) -> Result<Vec<ClientSet>> {
        let factory = RemoteClientFactory::new(&self.job_name, &self.ip)
            .with_budget_batch(self.job_desc.budget.apply_batch);

        (0..self.n_tasks)
            .map(|slot| {
                let counter = self
                    .counters
                    .get(slot)
                    .ok_or(ContainerError::MissingHandle { kind: "counter", slot })?;
                let budget = self
                    .budgets
                    .get(slot)
                    .ok_or(ContainerError::MissingHandle { kind: "budget", slot })?;
                let speed = self
                    .speeds
                    .get(slot)
                    .ok_or(ContainerError::MissingHandle { kind: "speed", slot })?;

                let task_id = self.slot_task_id(slot);
                Ok(factory.build(task_id, counter, budget, speed)?)
            })
            .collect()
    }

    /// One task and one (unstarted) thread per slot
    fn init_tasks(
        &self,
        clients: Vec<ClientSet>,
        logger: &JobLogger,
    ) -> Result<(Vec<Arc<dyn TaskWorker>>, Vec<PendingThread>)> {
        let mut tasks = Vec::with_capacity(self.n_tasks);
        let mut threads = Vec::with_capacity(self.n_tasks + 1);

        for (slot, clients) in clients.into_iter().enumerate() {
            let task_id = self.slot_task_id(slot);
            let ctx = TaskContext {
                task_dir: self.task_dir(task_id),
                job_desc: Arc::clone(&self.job_desc),
                task_id,
                mq: Arc::clone(&self.mq),
                stopped: self.stopped.clone(),
                nonsuspend: self.nonsuspend.clone(),
                clients,
                logger: logger.clone(),
                env: Arc::clone(&self.env),
                is_local: self.is_local,
                job_name: self.job_name.clone(),
            };

            let task = self.task_builder.build(ctx)?;
            tracing::debug!(slot, task_id, "Task built");

            let body = {
                let task = Arc::clone(&task);
                let logger = logger.clone();
                move || {
                    logger.in_scope(|| {
                        if let Err(e) = task.run() {
                            tracing::error!(task_id = task.task_id(), "Task exited with error: {}", e);
                        }
                    })
                }
            };
            threads.push(PendingThread::new(format!("task-{}", task_id), body));
            tasks.push(task);
        }

        Ok((tasks, threads))
    }

    fn init_counter_sync(&self, tasks: &[Arc<dyn TaskWorker>], logger: &JobLogger) -> PendingThread {
        let sync = CounterSync::new(tasks.to_vec(), self.stopped.clone(), self.sync_interval);
        let logger = logger.clone();
        PendingThread::new(
            format!("counter-sync-{}", self.container_id),
            move || logger.in_scope(|| sync.run()),
        )
    }

    /// Initializes if needed and starts every task thread and the sync thread
    ///
    /// With `block`, waits for all of them as [`wait_for_stop`] does.
    /// Threads are started once. If a spawn fails, the threads already started
    /// keep running, the rest stay pending and a later call starts them.
    ///
    /// [`wait_for_stop`]: Container::wait_for_stop
    pub fn run(&self, block: bool) -> Result<()> {
        self.init()?;

        {
            let mut state = self.lock_state();
            let mut started = 0;

            while let Some(next) = state.pending.first() {
                let handle = next.start()?;
                let thread = state.pending.remove(0);
                state.running.push((thread.name, handle));
                state.phase = ContainerPhase::Running;
                started += 1;
            }

            match (started, &state.logger) {
                (0, _) => tracing::debug!("Container {} already started", self.container_id),
                (_, Some(logger)) => logger.in_scope(|| {
                    tracing::info!(
                        container_id = self.container_id,
                        "Started {} threads",
                        started
                    )
                }),
                (_, None) => {}
            }
        }

        if block {
            self.wait_for_stop()?;
        }
        Ok(())
    }

    /// Initializes if needed, then joins every started thread
    ///
    /// Returns once all task threads and the sync thread have ended, which
    /// happens after the owner sets `stopped`. A task that crashed counts as
    /// ended. If [`run`](Container::run) was never called there is nothing to
    /// join and this returns immediately.
    pub fn wait_for_stop(&self) -> Result<()> {
        self.init()?;

        let running = {
            let mut state = self.lock_state();
            if state.joining {
                // Another caller is joining; wait until it is done.
                while state.joining {
                    state = self
                        .joined
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                return Ok(());
            }
            if state.running.is_empty() {
                return Ok(());
            }
            state.joining = true;
            std::mem::take(&mut state.running)
        };

        for (name, handle) in running {
            if handle.join().is_err() {
                tracing::warn!("Thread {} panicked", name);
            }
        }

        {
            let mut state = self.lock_state();
            state.joining = false;
            if state.pending.is_empty() {
                state.phase = ContainerPhase::Stopped;
            }
        }
        self.joined.notify_all();
        Ok(())
    }

    fn slot_task_id(&self, slot: usize) -> u32 {
        self.task_start_id + slot as u32
    }

    // Thread handles and built tasks remain valid after a panic elsewhere.
    fn lock_state(&self) -> MutexGuard<'_, ContainerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
