use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Job configuration values shared with every task (`ip` overrides node IP discovery)
pub type Env = HashMap<String, String>;

/// Node-level configuration for one container
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    /// Identifier of this container within the node
    #[serde(rename = "container-id", default)]
    pub container_id: u32,

    /// Filesystem root for the container's log and task directories
    #[serde(rename = "working-dir")]
    pub working_dir: PathBuf,

    /// Path to the job descriptor (file or directory holding `job.toml`)
    #[serde(rename = "job-path")]
    pub job_path: PathBuf,

    /// Job name override; defaults to the descriptor's name
    #[serde(rename = "job-name", default)]
    pub job_name: Option<String>,

    /// Number of task workers this container runs
    #[serde(rename = "n-tasks", default = "default_n_tasks")]
    pub n_tasks: usize,

    /// Global id of the first local task
    #[serde(rename = "task-start-id", default)]
    pub task_start_id: u32,

    /// Whether the job runs on a single machine without a master
    #[serde(rename = "is-local", default = "default_is_local")]
    pub is_local: bool,

    /// Address of the cluster's coordinating node
    #[serde(default)]
    pub master: Option<String>,

    /// Seconds between counter synchronizations
    #[serde(rename = "sync-interval", default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Free-form job environment
    #[serde(default)]
    pub env: Env,
}

fn default_n_tasks() -> usize {
    1
}

fn default_is_local() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    5
}

/// Loaded job descriptor: what a job crawls and how
#[derive(Debug, Clone, Deserialize)]
pub struct JobDesc {
    /// Job name, used to scope counters, budget and speed on the services
    pub name: String,

    /// Starting URLs
    #[serde(default)]
    pub seeds: Vec<String>,

    #[serde(default)]
    pub crawler: CrawlSettings,

    #[serde(default)]
    pub budget: BudgetSettings,

    #[serde(default)]
    pub speed: SpeedSettings,
}

/// Per-task crawl behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSettings {
    /// Hosts links may be followed into; empty means the seed hosts
    #[serde(rename = "allowed-domains", default)]
    pub allowed_domains: Vec<String>,

    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Whether robots.txt is consulted before fetching
    #[serde(rename = "respect-robots", default = "default_respect_robots")]
    pub respect_robots: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            respect_robots: default_respect_robots(),
        }
    }
}

fn default_user_agent() -> String {
    format!("sumi-swarm/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_respect_robots() -> bool {
    true
}

/// Cluster-wide crawl budget
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetSettings {
    /// Total pages the job may fetch; absent means unlimited
    #[serde(default)]
    pub size: Option<u64>,

    /// Units a task reserves from the budget service at a time
    #[serde(rename = "apply-batch", default = "default_apply_batch")]
    pub apply_batch: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            size: None,
            apply_batch: default_apply_batch(),
        }
    }
}

fn default_apply_batch() -> u64 {
    10
}

/// Cluster-wide crawl speed
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeedSettings {
    /// Requests per second across the whole job; absent means unlimited
    #[serde(default)]
    pub max: Option<u32>,
}
