//! Integration tests for the crawl task
//!
//! These tests use wiremock to create mock HTTP servers and run a whole
//! container of crawl tasks against them in local mode.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_swarm::functions::{
    BudgetHandle, CounterHandle, LocalBudgetService, LocalCounterService, LocalSpeedService,
    SpeedHandle,
};
use sumi_swarm::mq::{LocalMessageQueue, MessageQueue};
use sumi_swarm::task::{TaskCheckpoint, CHECKPOINT_FILE};
use sumi_swarm::{Container, ContainerParams, Env, Signal};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JOB: &str = "mock-site";

struct Crawl {
    dir: TempDir,
    container: Arc<Container>,
    counter: Arc<LocalCounterService>,
    mq: Arc<LocalMessageQueue>,
    stopped: Signal,
    nonsuspend: Signal,
}

/// Serves a small site: `/` links to `/a`, `/missing`, `/private` and an
/// off-site page; `/a` links back to `/`
async fn mock_site() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><head><title>Home</title></head><body>
                <a href="/a">A</a>
                <a href="/missing">Missing</a>
                <a href="/private">Private</a>
                <a href="https://elsewhere.example/">Elsewhere</a>
            </body></html>"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<html><body><a href="/">Home</a></body></html>"#,
            "text/html; charset=utf-8",
        ))
        .mount(&server)
        .await;

    server
}

fn start_crawl(server: &MockServer, n_tasks: usize, budget: Option<u64>) -> Crawl {
    let dir = TempDir::new().unwrap();
    let seed = format!("{}/", server.uri());

    let job_path = dir.path().join("job.toml");
    std::fs::write(
        &job_path,
        format!(
            r#"
name = "{JOB}"
seeds = ["{seed}"]

[crawler]
user-agent = "TestBot/1.0"
request-timeout = 5

[budget]
apply-batch = 1
"#
        ),
    )
    .unwrap();

    let counter = Arc::new(LocalCounterService::new());
    let budget_service: BudgetHandle = Arc::new(LocalBudgetService::new(budget));
    let speed_service: SpeedHandle = Arc::new(LocalSpeedService::new(None));
    let mq = Arc::new(LocalMessageQueue::with_seeds(&[seed]));
    let stopped = Signal::new();
    let nonsuspend = Signal::new();

    let mut env = Env::new();
    env.insert("ip".to_string(), "127.0.0.1".to_string());

    let params = ContainerParams {
        container_id: 0,
        working_dir: dir.path().join("work"),
        mq: mq.clone(),
        job_path,
        env,
        job_name: JOB.to_string(),
        counters: (0..n_tasks).map(|_| counter.clone() as CounterHandle).collect(),
        budgets: vec![budget_service; n_tasks],
        speeds: vec![speed_service; n_tasks],
        stopped: stopped.clone(),
        nonsuspend: nonsuspend.clone(),
        n_tasks,
        is_local: true,
        master_ip: None,
        logger: None,
        task_start_id: 0,
    };

    let container = Container::new(params)
        .unwrap()
        .with_sync_interval(Duration::from_millis(50));
    container.run(false).unwrap();

    Crawl {
        dir,
        container: Arc::new(container),
        counter,
        mq,
        stopped,
        nonsuspend,
    }
}

impl Crawl {
    fn total(&self, group: &str, item: &str) -> u64 {
        self.counter.get(JOB, group, item)
    }

    fn checkpoint_path(&self, task_id: u32) -> std::path::PathBuf {
        self.dir
            .path()
            .join("work")
            .join(task_id.to_string())
            .join(CHECKPOINT_FILE)
    }

    async fn stop(&self) {
        self.stopped.set();
        let container = Arc::clone(&self.container);
        tokio::task::spawn_blocking(move || container.wait_for_stop())
            .await
            .unwrap()
            .unwrap();
    }
}

fn read_checkpoint(path: &Path) -> TaskCheckpoint {
    TaskCheckpoint::read(path.parent().unwrap()).unwrap()
}

async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_crawl_local_mode() {
    let server = mock_site().await;
    let crawl = start_crawl(&server, 2, None);
    crawl.nonsuspend.set();

    let settled = wait_until(Duration::from_secs(20), || {
        crawl.total("pages", "fetched")
            + crawl.total("pages", "failed")
            + crawl.total("pages", "disallowed")
            == 4
    })
    .await;
    assert!(settled, "crawl did not settle");

    assert_eq!(crawl.total("pages", "fetched"), 2);
    assert_eq!(crawl.total("pages", "failed"), 1);
    assert_eq!(crawl.total("pages", "disallowed"), 1);
    assert_eq!(crawl.total("links", "queued"), 3);

    // The off-site link was never queued
    assert_eq!(crawl.mq.seen_count(), 4);
    assert!(crawl.mq.is_empty());

    crawl.stop().await;

    let fetched: u64 = (0..2)
        .map(|id| read_checkpoint(&crawl.checkpoint_path(id)).pages_fetched)
        .sum();
    assert_eq!(fetched, 2);

    let log = std::fs::read_to_string(crawl.container.log_file()).unwrap();
    assert!(log.contains("Task started"));
    assert!(log.contains("Task finished"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_budget_ends_tasks() {
    let server = mock_site().await;
    let crawl = start_crawl(&server, 2, Some(1));
    crawl.nonsuspend.set();

    // Tasks finish on their own once the budget is spent
    let finished = wait_until(Duration::from_secs(20), || {
        crawl.checkpoint_path(0).exists() && crawl.checkpoint_path(1).exists()
    })
    .await;
    assert!(finished, "tasks did not finish on an exhausted budget");

    let fetched: u64 = (0..2)
        .map(|id| read_checkpoint(&crawl.checkpoint_path(id)).pages_fetched)
        .sum();
    assert_eq!(fetched, 1);

    // Discovered links stay queued for a later run
    assert!(!crawl.mq.is_empty());

    crawl.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_suspended_tasks_do_not_fetch() {
    let server = mock_site().await;
    let crawl = start_crawl(&server, 1, None);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty());
    assert_eq!(crawl.mq.len(), 1);

    crawl.stop().await;

    let checkpoint = read_checkpoint(&crawl.checkpoint_path(0));
    assert_eq!(checkpoint.pages_fetched, 0);
    assert_eq!(checkpoint.job_name, JOB);
}
