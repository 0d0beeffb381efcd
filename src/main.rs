//! Sumi-Swarm main entry point
//!
//! Runs one container of a crawl job in local mode: every coordination
//! service lives in this process and the queue is seeded from the job.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sumi_swarm::config::{compute_job_hash, load_container_config, ContainerConfig};
use sumi_swarm::functions::{
    BudgetHandle, CounterHandle, LocalBudgetService, LocalCounterService, LocalSpeedService,
    SpeedHandle,
};
use sumi_swarm::mq::LocalMessageQueue;
use sumi_swarm::task::TaskCheckpoint;
use sumi_swarm::{import_job_desc, Container, ContainerParams, JobDesc, Signal};
use tracing_subscriber::EnvFilter;

/// Sumi-Swarm: the per-node execution container of a distributed crawl
///
/// Loads a container configuration, builds the job's task workers and runs
/// them until interrupted (Ctrl-C) or until the optional duration elapses.
#[derive(Parser, Debug)]
#[command(name = "sumi-swarm")]
#[command(version = "1.0.0")]
#[command(about = "Per-node crawl container", long_about = None)]
struct Cli {
    /// Path to the container configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Stop the job after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Validate the configuration and job, then exit without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = load_container_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let job = import_job_desc(&config.job_path)
        .with_context(|| format!("failed to load job from {}", config.job_path.display()))?;
    let job_hash = compute_job_hash(&config.job_path)?;
    tracing::info!("Job {} loaded (hash: {})", job.name, job_hash);

    if cli.dry_run {
        handle_dry_run(&config, &job);
        return Ok(());
    }

    handle_run(config, job, cli.duration).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_swarm=info,warn"),
            1 => EnvFilter::new("sumi_swarm=debug,info"),
            2 => EnvFilter::new("sumi_swarm=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what the container would run
fn handle_dry_run(config: &ContainerConfig, job: &JobDesc) {
    println!("=== Sumi-Swarm Dry Run ===\n");

    println!("Container:");
    println!("  Id: {}", config.container_id);
    println!("  Working dir: {}", config.working_dir.display());
    println!(
        "  Tasks: {} (ids {}..{})",
        config.n_tasks,
        config.task_start_id,
        config.task_start_id as usize + config.n_tasks
    );
    println!("  Sync interval: {}s", config.sync_interval);
    match &config.master {
        Some(master) => println!("  Master: {}", master),
        None => println!("  Master: none (local mode)"),
    }

    println!("\nJob {}:", job.name);
    println!("  User agent: {}", job.crawler.user_agent);
    println!("  Respect robots.txt: {}", job.crawler.respect_robots);
    match job.budget.size {
        Some(size) => println!("  Budget: {} pages", size),
        None => println!("  Budget: unlimited"),
    }
    match job.speed.max {
        Some(max) => println!("  Speed: {} requests/s", max),
        None => println!("  Speed: unlimited"),
    }

    println!("\nSeeds ({}):", job.seeds.len());
    for seed in &job.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main run: starts the container and stops it on request
async fn handle_run(
    config: ContainerConfig,
    job: JobDesc,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    let job_name = config.job_name.clone().unwrap_or_else(|| job.name.clone());
    let n_tasks = config.n_tasks;
    let task_ids: Vec<u32> = (0..n_tasks as u32).map(|i| config.task_start_id + i).collect();

    // Local mode: one instance of each service shared by every slot
    let counter = Arc::new(LocalCounterService::new());
    let budget: BudgetHandle = Arc::new(LocalBudgetService::new(job.budget.size));
    let speed: SpeedHandle = Arc::new(LocalSpeedService::new(job.speed.max));

    let stopped = Signal::new();
    let nonsuspend = Signal::new();
    nonsuspend.set();

    let params = ContainerParams {
        container_id: config.container_id,
        working_dir: config.working_dir,
        mq: Arc::new(LocalMessageQueue::with_seeds(&job.seeds)),
        job_path: config.job_path,
        env: config.env,
        job_name: job_name.clone(),
        counters: vec![counter.clone() as CounterHandle; n_tasks],
        budgets: vec![budget; n_tasks],
        speeds: vec![speed; n_tasks],
        stopped: stopped.clone(),
        nonsuspend,
        n_tasks,
        is_local: config.is_local,
        master_ip: config.master,
        logger: None,
        task_start_id: config.task_start_id,
    };

    let container = Arc::new(
        Container::new(params)?.with_sync_interval(Duration::from_secs(config.sync_interval)),
    );
    container.run(false)?;

    tracing::info!(
        "Container {} running {} tasks on {} (log: {})",
        container.container_id(),
        n_tasks,
        container.ip(),
        container.log_file().display()
    );

    wait_for_shutdown(duration).await;
    tracing::info!("Stopping job {}", job_name);
    stopped.set();

    let waiter = Arc::clone(&container);
    tokio::task::spawn_blocking(move || waiter.wait_for_stop())
        .await
        .context("container wait panicked")??;

    print_checkpoints(&container, &task_ids);
    print_totals(&job_name, &counter);
    Ok(())
}

/// Resolves on Ctrl-C, or once `duration` seconds have passed
async fn wait_for_shutdown(duration: Option<u64>) {
    let timeout = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(timeout);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                (&mut timeout).await;
            }
        }
        _ = &mut timeout => {
            tracing::info!("Run duration elapsed");
        }
    }
}

/// Prints the final per-task counts, summed over every task's checkpoint
fn print_checkpoints(container: &Container, task_ids: &[u32]) {
    let checkpoints: Vec<TaskCheckpoint> = task_ids
        .iter()
        .filter_map(|&id| match TaskCheckpoint::read(&container.task_dir(id)) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!("No checkpoint for task {}: {}", id, e);
                None
            }
        })
        .collect();
    let sum = |field: fn(&TaskCheckpoint) -> u64| checkpoints.iter().map(field).sum::<u64>();

    println!(
        "\n=== Final counts ({} of {} tasks) ===",
        checkpoints.len(),
        task_ids.len()
    );
    println!("  pages.fetched: {}", sum(|c| c.pages_fetched));
    println!("  pages.failed: {}", sum(|c| c.pages_failed));
    println!("  pages.skipped: {}", sum(|c| c.pages_skipped));
    println!("  pages.disallowed: {}", sum(|c| c.pages_disallowed));
    println!("  links.queued: {}", sum(|c| c.links_queued));
}

/// Prints the job totals known to the counter service
///
/// Counts recorded after the last sync pass are not included.
fn print_totals(job_name: &str, counter: &LocalCounterService) {
    let totals = counter.totals(job_name);

    println!("\n=== Job {} (as of last sync) ===", job_name);
    if totals.is_empty() {
        println!("  No counters recorded");
    }
    for (group, items) in &totals {
        for (item, value) in items {
            println!("  {}.{}: {}", group, item, value);
        }
    }
}
