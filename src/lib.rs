//! Sumi-Swarm: the per-node execution container of a distributed crawl
//!
//! A container runs one node's slice of a crawl job. It owns a fixed pool of
//! task workers, wires each of them to its own set of coordination clients
//! (budget, speed, counter), and keeps local progress counters in step with
//! the cluster through a background synchronization loop.

pub mod config;
pub mod container;
pub mod functions;
pub mod logging;
pub mod mq;
pub mod net;
pub mod signal;
pub mod task;

use thiserror::Error;

/// Main error type for container operations
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordination client error: {0}")]
    Client(#[from] functions::ClientError),

    #[error("Message queue error: {0}")]
    Queue(#[from] mq::QueueError),

    #[error("No {kind} handle supplied for task slot {slot}")]
    MissingHandle { kind: &'static str, slot: usize },

    #[error("Failed to open log file {path}: {source}")]
    Logger {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to serialize task checkpoint: {0}")]
    Checkpoint(#[from] toml::ser::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{import_job_desc, ContainerConfig, Env, JobDesc};
pub use container::{Container, ContainerParams};
pub use logging::{get_logger, JobLogger};
pub use signal::Signal;
