//! Default task worker: a polite single-threaded crawl loop
//!
//! Each iteration takes one URL from the shared queue, pays one unit of
//! budget, waits for a speed permit, checks robots.txt, fetches the page and
//! queues the in-scope links it finds. Progress is recorded on the task's
//! counter client under the `pages` and `links` groups.

use crate::config::JobDesc;
use crate::ConfigError;
use crate::functions::CounterClient;
use crate::task::fetcher::{build_http_client, fetch_robots, fetch_url, FetchResult};
use crate::task::parser::parse_html;
use crate::task::robots::RobotsPolicy;
use crate::task::{TaskBuilder, TaskContext, TaskWorker};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use url::Url;

/// File written to the task directory when a task finishes
pub const CHECKPOINT_FILE: &str = "checkpoint.toml";

/// How long an idle task waits on `stopped` before polling the queue again
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// How long a suspended task waits on `nonsuspend` between stop checks
const SUSPEND_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct TaskStats {
    fetched: u64,
    failed: u64,
    skipped: u64,
    disallowed: u64,
    links_queued: u64,
}

/// Summary a task leaves behind in its directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskCheckpoint {
    pub task_id: u32,
    pub job_name: String,
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    pub pages_disallowed: u64,
    pub links_queued: u64,
    pub finished_at: DateTime<Utc>,
}

impl TaskCheckpoint {
    /// Reads the checkpoint a task left in `task_dir`
    pub fn read(task_dir: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(task_dir.join(CHECKPOINT_FILE))?;
        let checkpoint = toml::from_str(&content).map_err(ConfigError::from)?;
        Ok(checkpoint)
    }
}

/// Builds a [`CrawlTask`] per slot, creating its task directory
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlTaskBuilder;

impl TaskBuilder for CrawlTaskBuilder {
    fn build(&self, ctx: TaskContext) -> crate::Result<Arc<dyn TaskWorker>> {
        std::fs::create_dir_all(&ctx.task_dir)?;
        Ok(Arc::new(CrawlTask::new(ctx)))
    }
}

/// Crawl task bound to one slot
pub struct CrawlTask {
    ctx: TaskContext,

    /// Hosts (and their subdomains) whose links are queued
    scope: Vec<String>,

    /// robots.txt policy per origin
    robots: Mutex<HashMap<String, RobotsPolicy>>,

    /// Product token matched against robots.txt user-agent lines
    agent_token: String,
}

impl CrawlTask {
    pub fn new(ctx: TaskContext) -> Self {
        let scope = crawl_scope(&ctx.job_desc);
        let agent_token = ctx
            .job_desc
            .crawler
            .user_agent
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        Self {
            ctx,
            scope,
            robots: Mutex::new(HashMap::new()),
            agent_token,
        }
    }

    pub fn task_dir(&self) -> &Path {
        &self.ctx.task_dir
    }

    /// Whether a link's host falls inside the job's crawl scope
    pub fn in_scope(&self, link: &str) -> bool {
        Url::parse(link)
            .ok()
            .and_then(|url| url.host_str().map(|h| h.to_lowercase()))
            .map(|host| host_in_scope(&host, &self.scope))
            .unwrap_or(false)
    }

    fn crawl_loop(&self, runtime: &Runtime, client: &Client, stats: &mut TaskStats) -> crate::Result<()> {
        let ctx = &self.ctx;

        while !ctx.stopped.is_set() {
            if !ctx.nonsuspend.is_set() {
                ctx.nonsuspend.wait(SUSPEND_POLL);
                continue;
            }

            let Some(url) = ctx.mq.get()? else {
                ctx.stopped.wait(IDLE_WAIT);
                continue;
            };

            if ctx.clients.budget.apply(1)? == 0 {
                tracing::info!(task_id = ctx.task_id, "Budget exhausted, task finishing");
                ctx.mq.requeue(url)?;
                break;
            }

            if !ctx.clients.speed.acquire(1, &ctx.stopped)? {
                ctx.mq.requeue(url)?;
                break;
            }

            runtime.block_on(self.process_url(client, &url, stats));
        }

        Ok(())
    }

    async fn process_url(&self, client: &Client, url: &str, stats: &mut TaskStats) {
        let counter = &self.ctx.clients.counter;

        let parsed_url = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                tracing::debug!("Dropping unparsable URL {}: {}", url, e);
                stats.failed += 1;
                counter.inc("pages", "failed", 1);
                return;
            }
        };

        if self.ctx.job_desc.crawler.respect_robots {
            let robots = self.robots_for(client, &parsed_url).await;
            if !robots.allows(url, &self.agent_token) {
                tracing::debug!("URL {} disallowed by robots.txt", url);
                stats.disallowed += 1;
                counter.inc("pages", "disallowed", 1);
                return;
            }
        }

        match fetch_url(client, url).await {
            FetchResult::Success {
                final_url, body, ..
            } => {
                let base = Url::parse(&final_url).unwrap_or(parsed_url);
                let page = parse_html(&body, &base);
                let links: Vec<String> = page
                    .links
                    .into_iter()
                    .filter(|link| self.in_scope(link))
                    .collect();

                let queued = match self.ctx.mq.put(&links) {
                    Ok(n) => n as u64,
                    Err(e) => {
                        tracing::warn!("Failed to queue links from {}: {}", url, e);
                        0
                    }
                };

                stats.fetched += 1;
                stats.links_queued += queued;
                counter.inc("pages", "fetched", 1);
                counter.inc("links", "queued", queued);

                tracing::debug!(
                    task_id = self.ctx.task_id,
                    title = page.title.as_deref().unwrap_or(""),
                    found = links.len(),
                    queued,
                    "Fetched {}",
                    url
                );
            }
            FetchResult::ContentMismatch { content_type } => {
                tracing::debug!("Skipping {}: content type {}", url, content_type);
                stats.skipped += 1;
                counter.inc("pages", "skipped", 1);
            }
            FetchResult::HttpError { status_code } => {
                tracing::debug!("HTTP {} for {}", status_code, url);
                stats.failed += 1;
                counter.inc("pages", "failed", 1);
            }
            FetchResult::NetworkError { error } => {
                tracing::warn!("Fetch failed for {}: {}", url, error);
                stats.failed += 1;
                counter.inc("pages", "failed", 1);
            }
        }
    }

    async fn robots_for(&self, client: &Client, url: &Url) -> RobotsPolicy {
        let origin = url.origin().ascii_serialization();

        let cached = self.robots_cache().get(&origin).cloned();
        if let Some(policy) = cached {
            return policy;
        }

        let policy = fetch_robots(client, url).await;
        self.robots_cache().insert(origin, policy.clone());
        policy
    }

    fn robots_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, RobotsPolicy>> {
        self.robots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_checkpoint(&self, stats: &TaskStats) -> crate::Result<TaskCheckpoint> {
        let checkpoint = TaskCheckpoint {
            task_id: self.ctx.task_id,
            job_name: self.ctx.job_name.clone(),
            pages_fetched: stats.fetched,
            pages_failed: stats.failed,
            pages_skipped: stats.skipped,
            pages_disallowed: stats.disallowed,
            links_queued: stats.links_queued,
            finished_at: Utc::now(),
        };

        std::fs::create_dir_all(&self.ctx.task_dir)?;
        let content = toml::to_string(&checkpoint)?;
        std::fs::write(self.ctx.task_dir.join(CHECKPOINT_FILE), content)?;
        Ok(checkpoint)
    }
}

impl TaskWorker for CrawlTask {
    fn task_id(&self) -> u32 {
        self.ctx.task_id
    }

    fn run(&self) -> crate::Result<()> {
        let ctx = &self.ctx;

        // Built here so the runtime is created and dropped on the task thread.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = build_http_client(&ctx.job_desc.crawler)?;

        tracing::info!(
            task_id = ctx.task_id,
            local = ctx.is_local,
            "Task started in {}",
            ctx.task_dir.display()
        );

        let mut stats = TaskStats::default();
        let outcome = self.crawl_loop(&runtime, &client, &mut stats);

        if let Err(e) = ctx.clients.budget.release() {
            tracing::warn!(task_id = ctx.task_id, "Failed to release budget: {}", e);
        }

        let checkpoint = self.write_checkpoint(&stats);
        outcome?;
        let checkpoint = checkpoint?;

        tracing::info!(
            task_id = ctx.task_id,
            fetched = checkpoint.pages_fetched,
            failed = checkpoint.pages_failed,
            "Task finished"
        );
        Ok(())
    }

    fn counter_client(&self) -> &CounterClient {
        &self.ctx.clients.counter
    }
}

/// Hosts a job may crawl: its allowed domains, or else its seed hosts
fn crawl_scope(job: &JobDesc) -> Vec<String> {
    let mut scope: Vec<String> = if job.crawler.allowed_domains.is_empty() {
        job.seeds
            .iter()
            .filter_map(|seed| Url::parse(seed).ok())
            .filter_map(|url| url.host_str().map(|h| h.to_lowercase()))
            .collect()
    } else {
        job.crawler
            .allowed_domains
            .iter()
            .map(|d| d.to_lowercase())
            .collect()
    };

    scope.sort();
    scope.dedup();
    scope
}

fn host_in_scope(host: &str, scope: &[String]) -> bool {
    scope.iter().any(|domain| {
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
