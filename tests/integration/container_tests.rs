//! Integration tests for the container lifecycle
//!
//! These tests drive containers through init, run and stop with lightweight
//! task workers and in-process coordination services.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use sumi_swarm::container::ContainerPhase;
use sumi_swarm::functions::{
    BudgetHandle, ClientError, ClientResult, CounterClient, CounterHandle, CounterService,
    CounterSnapshot, LocalBudgetService, LocalCounterService, LocalSpeedService, SpeedHandle,
};
use sumi_swarm::mq::LocalMessageQueue;
use sumi_swarm::net::IpResolver;
use sumi_swarm::task::{TaskContext, TaskWorker};
use sumi_swarm::{Container, ContainerError, ContainerParams, Env, Signal};
use tempfile::TempDir;

/// Records its task id on the counter service, then idles until stopped
struct ReportingTask {
    ctx: TaskContext,
    ran: Arc<AtomicUsize>,
}

impl TaskWorker for ReportingTask {
    fn task_id(&self) -> u32 {
        self.ctx.task_id
    }

    fn run(&self) -> sumi_swarm::Result<()> {
        self.ran.fetch_add(1, Ordering::SeqCst);
        self.ctx
            .clients
            .counter
            .inc("tasks", "id", u64::from(self.ctx.task_id));
        self.ctx.clients.speed.require(1)?;
        self.ctx.stopped.wait_forever();
        Ok(())
    }

    fn counter_client(&self) -> &CounterClient {
        &self.ctx.clients.counter
    }
}

/// Builds [`ReportingTask`]s and counts how often it was asked to
#[derive(Clone, Default)]
struct CountingBuilder {
    built: Arc<AtomicUsize>,
    ran: Arc<AtomicUsize>,
}

impl CountingBuilder {
    fn build(&self) -> impl Fn(TaskContext) -> sumi_swarm::Result<Arc<dyn TaskWorker>> + Send + Sync {
        let builder = self.clone();
        move |ctx: TaskContext| -> sumi_swarm::Result<Arc<dyn TaskWorker>> {
            builder.built.fetch_add(1, Ordering::SeqCst);
            assert!(ctx.task_dir.ends_with(ctx.task_id.to_string()));
            Ok(Arc::new(ReportingTask {
                ctx,
                ran: Arc::clone(&builder.ran),
            }))
        }
    }

    fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    fn ran(&self) -> usize {
        self.ran.load(Ordering::SeqCst)
    }
}

struct CountingResolver {
    calls: AtomicUsize,
}

impl IpResolver for CountingResolver {
    fn resolve(&self) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        "10.0.0.7".to_string()
    }
}

/// Panics on the first merge, fails the second, then accepts everything
struct UnreliableCounter {
    inner: LocalCounterService,
    calls: AtomicUsize,
}

impl CounterService for UnreliableCounter {
    fn merge(&self, job: &str, deltas: &CounterSnapshot) -> ClientResult<CounterSnapshot> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => panic!("counter service connection reset"),
            1 => Err(ClientError::Unavailable {
                service: "counter",
                reason: "timed out".to_string(),
            }),
            _ => self.inner.merge(job, deltas),
        }
    }
}

struct Fixture {
    _dir: TempDir,
    params: ContainerParams,
    counters: Vec<Arc<LocalCounterService>>,
    speeds: Vec<Arc<LocalSpeedService>>,
    stopped: Signal,
}

fn write_job(dir: &TempDir) -> PathBuf {
    let job_dir = dir.path().join("jobs").join("wiki");
    std::fs::create_dir_all(&job_dir).unwrap();
    std::fs::write(
        job_dir.join("job.toml"),
        r#"
name = "wiki"
seeds = ["https://example.com/"]

[budget]
apply-batch = 2
"#,
    )
    .unwrap();
    job_dir
}

fn fixture(n_tasks: usize, task_start_id: u32) -> Fixture {
    let dir = TempDir::new().unwrap();
    let counters: Vec<_> = (0..n_tasks)
        .map(|_| Arc::new(LocalCounterService::new()))
        .collect();
    let speeds: Vec<_> = (0..n_tasks)
        .map(|_| Arc::new(LocalSpeedService::new(None)))
        .collect();
    let stopped = Signal::new();

    let mut env = Env::new();
    env.insert("ip".to_string(), "10.0.0.9".to_string());

    let params = ContainerParams {
        container_id: 2,
        working_dir: dir.path().join("work"),
        mq: Arc::new(LocalMessageQueue::new()),
        job_path: write_job(&dir),
        env,
        job_name: "wiki".to_string(),
        counters: counters.iter().map(|c| c.clone() as CounterHandle).collect(),
        budgets: (0..n_tasks)
            .map(|_| Arc::new(LocalBudgetService::new(None)) as BudgetHandle)
            .collect(),
        speeds: speeds.iter().map(|s| s.clone() as SpeedHandle).collect(),
        stopped: stopped.clone(),
        nonsuspend: Signal::new(),
        n_tasks,
        is_local: true,
        master_ip: None,
        logger: None,
        task_start_id,
    };

    Fixture {
        _dir: dir,
        params,
        counters,
        speeds,
        stopped,
    }
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_concurrent_init_builds_once() {
    let fixture = fixture(3, 0);
    let builder = CountingBuilder::default();
    let container = Arc::new(
        Container::new(fixture.params)
            .unwrap()
            .with_task_builder(builder.build()),
    );

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let container = Arc::clone(&container);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                container.init()
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(builder.built(), 3);
    assert_eq!(container.task_ids(), vec![0, 1, 2]);
    assert_eq!(container.phase(), ContainerPhase::Initialized);
}

#[test]
fn test_failed_init_can_be_retried() {
    let fixture = fixture(2, 0);
    let fail = Arc::new(AtomicBool::new(true));
    let builder = CountingBuilder::default();

    let build = builder.build();
    let failing = {
        let fail = Arc::clone(&fail);
        move |ctx: TaskContext| -> sumi_swarm::Result<Arc<dyn TaskWorker>> {
            if ctx.task_id == 1 && fail.load(Ordering::SeqCst) {
                return Err(ContainerError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "task directory not writable",
                )));
            }
            build(ctx)
        }
    };

    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(failing);

    assert!(container.init().is_err());
    assert!(!container.is_initialized());
    assert!(container.run(false).is_err());
    assert_eq!(container.running_threads(), 0);

    fail.store(false, Ordering::SeqCst);
    container.init().unwrap();
    assert_eq!(container.task_ids(), vec![0, 1]);
}

#[test]
fn test_slots_get_their_own_clients() {
    let fixture = fixture(3, 10);
    let builder = CountingBuilder::default();
    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(builder.build())
        .with_sync_interval(Duration::from_millis(20));

    container.run(false).unwrap();

    let synced = wait_until(Duration::from_secs(10), || {
        fixture
            .counters
            .iter()
            .all(|c| c.get("wiki", "tasks", "id") > 0)
    });
    assert!(synced);

    for (slot, counter) in fixture.counters.iter().enumerate() {
        assert_eq!(counter.get("wiki", "tasks", "id"), 10 + slot as u64);
    }
    for (slot, speed) in fixture.speeds.iter().enumerate() {
        assert_eq!(
            speed.requesters("wiki"),
            vec![("10.0.0.9".to_string(), 10 + slot as u32)]
        );
    }

    fixture.stopped.set();
    container.wait_for_stop().unwrap();
}

#[test]
fn test_no_thread_starts_before_run() {
    let fixture = fixture(2, 0);
    let builder = CountingBuilder::default();
    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(builder.build());

    container.init().unwrap();
    thread::sleep(Duration::from_millis(100));

    assert_eq!(builder.built(), 2);
    assert_eq!(builder.ran(), 0);
    assert_eq!(container.running_threads(), 0);

    container.run(false).unwrap();
    assert!(wait_until(Duration::from_secs(5), || builder.ran() == 2));

    fixture.stopped.set();
    container.wait_for_stop().unwrap();
}

#[test]
fn test_run_starts_tasks_and_sync_thread() {
    let fixture = fixture(3, 0);
    let builder = CountingBuilder::default();
    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(builder.build());

    container.run(false).unwrap();

    assert_eq!(container.running_threads(), 4);
    assert_eq!(container.phase(), ContainerPhase::Running);
    assert!(wait_until(Duration::from_secs(5), || builder.ran() == 3));

    fixture.stopped.set();
    container.wait_for_stop().unwrap();
    assert_eq!(container.phase(), ContainerPhase::Stopped);
}

#[test]
fn test_blocking_run_returns_after_stop() {
    let fixture = fixture(2, 0);
    let builder = CountingBuilder::default();
    let stopped = fixture.stopped.clone();
    let container = Arc::new(
        Container::new(fixture.params)
            .unwrap()
            .with_task_builder(builder.build()),
    );

    let returned = Arc::new(AtomicBool::new(false));
    let runner = {
        let container = Arc::clone(&container);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            let result = container.run(true);
            returned.store(true, Ordering::SeqCst);
            result
        })
    };

    assert!(wait_until(Duration::from_secs(5), || builder.ran() == 2));
    thread::sleep(Duration::from_millis(200));
    assert!(!returned.load(Ordering::SeqCst));

    stopped.set();
    runner.join().unwrap().unwrap();
    assert_eq!(container.phase(), ContainerPhase::Stopped);
}

#[test]
fn test_concurrent_waiters_both_block_until_stop() {
    let fixture = fixture(1, 0);
    let builder = CountingBuilder::default();
    let stopped = fixture.stopped.clone();
    let container = Arc::new(
        Container::new(fixture.params)
            .unwrap()
            .with_task_builder(builder.build()),
    );
    container.run(false).unwrap();

    let returned = Arc::new(AtomicUsize::new(0));
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let container = Arc::clone(&container);
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                container.wait_for_stop().unwrap();
                returned.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(200));
    assert_eq!(returned.load(Ordering::SeqCst), 0);

    stopped.set();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(returned.load(Ordering::SeqCst), 2);
}

#[test]
fn test_crashed_task_does_not_block_stop() {
    struct CrashingTask {
        ctx: TaskContext,
    }

    impl TaskWorker for CrashingTask {
        fn task_id(&self) -> u32 {
            self.ctx.task_id
        }

        fn run(&self) -> sumi_swarm::Result<()> {
            panic!("parser blew up");
        }

        fn counter_client(&self) -> &CounterClient {
            &self.ctx.clients.counter
        }
    }

    let fixture = fixture(2, 0);
    let stopped = fixture.stopped.clone();
    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(|ctx: TaskContext| -> sumi_swarm::Result<Arc<dyn TaskWorker>> {
            Ok(Arc::new(CrashingTask { ctx }))
        });

    container.run(false).unwrap();
    stopped.set();
    container.wait_for_stop().unwrap();
    assert_eq!(container.phase(), ContainerPhase::Stopped);
}

#[test]
fn test_counter_sync_survives_service_faults() {
    let mut fixture = fixture(1, 5);
    let service = Arc::new(UnreliableCounter {
        inner: LocalCounterService::new(),
        calls: AtomicUsize::new(0),
    });
    fixture.params.counters = vec![service.clone() as CounterHandle];

    let builder = CountingBuilder::default();
    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(builder.build())
        .with_sync_interval(Duration::from_millis(20));

    container.run(false).unwrap();

    // The first pass panics and the second errors; the counts still arrive
    assert!(wait_until(Duration::from_secs(10), || {
        service.inner.get("wiki", "tasks", "id") == 5
    }));
    assert!(service.calls.load(Ordering::SeqCst) >= 3);

    fixture.stopped.set();
    container.wait_for_stop().unwrap();
    assert_eq!(container.phase(), ContainerPhase::Stopped);
}

#[test]
fn test_ip_resolved_once_when_not_configured() {
    let mut fixture = fixture(2, 0);
    fixture.params.env.clear();

    let resolver = CountingResolver {
        calls: AtomicUsize::new(0),
    };
    let builder = CountingBuilder::default();
    let container = Container::with_resolver(fixture.params, &resolver)
        .unwrap()
        .with_task_builder(builder.build());

    container.init().unwrap();
    container.init().unwrap();

    assert_eq!(container.ip(), "10.0.0.7");
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_job_log_records_lifecycle() {
    let fixture = fixture(1, 0);
    let builder = CountingBuilder::default();
    let container = Container::new(fixture.params)
        .unwrap()
        .with_task_builder(builder.build());

    container.run(false).unwrap();
    fixture.stopped.set();
    container.wait_for_stop().unwrap();

    let log = std::fs::read_to_string(container.log_file()).unwrap();
    assert!(log.contains("Initializing container for job wiki"));
    assert!(log.contains("Started 2 threads"));
}
