use crate::config::types::{ContainerConfig, JobDesc};
use crate::config::validation::{validate_container, validate_job};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File name looked up when a job path points at a directory
pub const JOB_FILE_NAME: &str = "job.toml";

/// Loads and validates a job descriptor
///
/// `path` may name the descriptor file itself or a job directory containing
/// `job.toml`.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_swarm::config::import_job_desc;
///
/// let job = import_job_desc(Path::new("jobs/wiki")).unwrap();
/// println!("Job {} has {} seeds", job.name, job.seeds.len());
/// ```
pub fn import_job_desc(path: &Path) -> Result<JobDesc, ConfigError> {
    let file = resolve_job_file(path);
    let content = std::fs::read_to_string(&file)?;
    let job: JobDesc = toml::from_str(&content)?;
    validate_job(&job)?;
    Ok(job)
}

/// Loads and validates a container configuration file
pub fn load_container_config(path: &Path) -> Result<ContainerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: ContainerConfig = toml::from_str(&content)?;
    validate_container(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the job descriptor content
///
/// Logged when a container initializes so that nodes running a stale copy of
/// a descriptor can be told apart.
pub fn compute_job_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(resolve_job_file(path))?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn resolve_job_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(JOB_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}
