//! Task workers
//!
//! A task is one independently running unit of crawl work, bound to one
//! slot of a container: one directory, one global task id, and one set of
//! coordination clients. The container decides how many tasks run and on
//! which threads; what a task does inside [`TaskWorker::run`] is up to the
//! [`TaskBuilder`] the container was given. [`CrawlTaskBuilder`] is the
//! default.

mod crawl;
mod fetcher;
mod parser;
mod robots;

pub use crawl::{CrawlTask, CrawlTaskBuilder, TaskCheckpoint, CHECKPOINT_FILE};
pub use fetcher::{build_http_client, fetch_robots, fetch_url, FetchResult};
pub use parser::{parse_html, ParsedPage};
pub use robots::RobotsPolicy;

use crate::config::{Env, JobDesc};
use crate::functions::{ClientSet, CounterClient};
use crate::logging::JobLogger;
use crate::mq::MessageQueueHandle;
use crate::signal::Signal;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a task is bound to at construction
#[derive(Clone)]
pub struct TaskContext {
    /// `working_dir/<task_id>`
    pub task_dir: PathBuf,

    /// Shared, read-only job descriptor
    pub job_desc: Arc<JobDesc>,

    /// Global task id (`task_start_id + slot`)
    pub task_id: u32,

    pub mq: MessageQueueHandle,

    /// Set by the job owner when the job is shutting down
    pub stopped: Signal,

    /// Set while tasks must not suspend
    pub nonsuspend: Signal,

    /// This slot's coordination clients
    pub clients: ClientSet,

    pub logger: JobLogger,

    pub env: Arc<Env>,

    pub is_local: bool,

    pub job_name: String,
}

/// A unit of crawl work run on its own thread
pub trait TaskWorker: Send + Sync {
    /// Global task id
    fn task_id(&self) -> u32;

    /// Runs the task until it finishes or observes the stop signal
    ///
    /// Blocks the calling thread. The container runs this on a dedicated
    /// thread and only logs the returned error.
    fn run(&self) -> crate::Result<()>;

    /// The counter client the container's sync loop reconciles
    fn counter_client(&self) -> &CounterClient;
}

/// Creates the task for one slot
pub trait TaskBuilder: Send + Sync {
    fn build(&self, ctx: TaskContext) -> crate::Result<Arc<dyn TaskWorker>>;
}

impl<F> TaskBuilder for F
where
    F: Fn(TaskContext) -> crate::Result<Arc<dyn TaskWorker>> + Send + Sync,
{
    fn build(&self, ctx: TaskContext) -> crate::Result<Arc<dyn TaskWorker>> {
        self(ctx)
    }
}
