//! Configuration module for Sumi-Swarm
//!
//! This module loads and validates the two TOML documents a node deals with:
//! the container configuration handed to the binary, and the job descriptor
//! that says what a job crawls.
//!
//! # Example
//!
//! ```no_run
//! use sumi_swarm::config::{import_job_desc, load_container_config};
//! use std::path::Path;
//!
//! let config = load_container_config(Path::new("container.toml")).unwrap();
//! let job = import_job_desc(&config.job_path).unwrap();
//! println!("{} tasks will crawl job {}", config.n_tasks, job.name);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BudgetSettings, ContainerConfig, CrawlSettings, Env, JobDesc, SpeedSettings,
};

// Re-export parser functions
pub use parser::{compute_job_hash, import_job_desc, load_container_config, JOB_FILE_NAME};
