//! Job logger provider
//!
//! Every container logs to a job log file under its working directory and,
//! when the job has a master, ships each formatted line to the master as a
//! UDP datagram. The logger is a [`tracing::Dispatch`] rather than the global
//! subscriber, so several containers in one process keep separate logs; a
//! thread opts in with [`JobLogger::in_scope`].

use crate::ContainerError;
use std::fs::OpenOptions;
use std::io;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Dispatch;
use tracing_subscriber::fmt::writer::{MakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Port the master listens on for shipped log lines
pub const DEFAULT_LOG_PORT: u16 = 9120;

/// File name of the job log inside a container's working directory
pub const JOB_LOG_FILE: &str = "job.log";

/// A logger shared by a container and all of its tasks
#[derive(Debug, Clone)]
pub struct JobLogger {
    dispatch: Dispatch,
    path: PathBuf,
    server: Option<String>,
}

impl JobLogger {
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Path of the log file this logger writes to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address log lines are shipped to, if any
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Runs `f` with this logger as the current thread's default
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

/// Builds a logger writing to `filename` and optionally to `server`
///
/// `server` is `host` or `host:port`; the port defaults to
/// [`DEFAULT_LOG_PORT`]. The file is opened in append mode and its parent
/// directory is created if missing.
pub fn get_logger(filename: &Path, server: Option<&str>) -> Result<JobLogger, ContainerError> {
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(filename)
        .map_err(|source| ContainerError::Logger {
            path: filename.display().to_string(),
            source,
        })?;
    let file = Arc::new(file);

    let (dispatch, server) = match server {
        Some(server) => {
            let addr = log_server_addr(server);
            let remote = Arc::new(RemoteLogWriter::connect(&addr)?);
            (build_dispatch(file.and(remote)), Some(addr))
        }
        None => (build_dispatch(file), None),
    };

    Ok(JobLogger {
        dispatch,
        path: filename.to_path_buf(),
        server,
    })
}

fn build_dispatch<W>(writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true)
        .finish();

    Dispatch::new(subscriber)
}

fn log_server_addr(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, DEFAULT_LOG_PORT)
    }
}

/// Sends every formatted event as one datagram
#[derive(Debug)]
struct RemoteLogWriter {
    socket: UdpSocket,
}

impl RemoteLogWriter {
    fn connect(addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        Ok(Self { socket })
    }
}

impl io::Write for &RemoteLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Shipping is best effort; the local file is the record.
        let _ = self.socket.send(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
