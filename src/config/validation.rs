use crate::config::types::{BudgetSettings, ContainerConfig, CrawlSettings, JobDesc, SpeedSettings};
use crate::ConfigError;
use url::Url;

/// Validates a job descriptor
pub fn validate_job(job: &JobDesc) -> Result<(), ConfigError> {
    validate_job_name(&job.name)?;
    validate_seeds(&job.seeds)?;
    validate_crawl_settings(&job.crawler)?;
    validate_budget_settings(&job.budget)?;
    validate_speed_settings(&job.speed)?;
    Ok(())
}

/// Validates the node-level container configuration
pub fn validate_container(config: &ContainerConfig) -> Result<(), ConfigError> {
    if config.n_tasks < 1 {
        return Err(ConfigError::Validation(format!(
            "n_tasks must be >= 1, got {}",
            config.n_tasks
        )));
    }

    if config.sync_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "sync_interval must be >= 1 second, got {}",
            config.sync_interval
        )));
    }

    if config.working_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "working_dir cannot be empty".to_string(),
        ));
    }

    if let Some(name) = &config.job_name {
        validate_job_name(name)?;
    }

    if let Some(master) = &config.master {
        if master.trim().is_empty() {
            return Err(ConfigError::Validation(
                "master cannot be an empty address".to_string(),
            ));
        }
    }

    Ok(())
}

/// Job names scope shared state on the services: alphanumeric, '-' and '_' only
fn validate_job_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation("job name cannot be empty".to_string()));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "job name must contain only alphanumeric characters, '-' and '_', got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' has no host",
                seed
            )));
        }
    }

    Ok(())
}

fn validate_crawl_settings(settings: &CrawlSettings) -> Result<(), ConfigError> {
    if settings.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if settings.request_timeout < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be >= 1 second, got {}",
            settings.request_timeout
        )));
    }

    for domain in &settings.allowed_domains {
        validate_domain_string(domain)?;
    }

    Ok(())
}

fn validate_budget_settings(settings: &BudgetSettings) -> Result<(), ConfigError> {
    if settings.apply_batch < 1 {
        return Err(ConfigError::Validation(format!(
            "apply_batch must be >= 1, got {}",
            settings.apply_batch
        )));
    }
    Ok(())
}

fn validate_speed_settings(settings: &SpeedSettings) -> Result<(), ConfigError> {
    if settings.max == Some(0) {
        return Err(ConfigError::Validation(
            "speed max must be >= 1 request per second when set".to_string(),
        ));
    }
    Ok(())
}

/// Validates a host name or IP literal
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::Validation(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}
