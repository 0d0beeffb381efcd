//! Message queue handle shared by every task of a job
//!
//! The queue distributes URLs between tasks. The container never looks inside
//! it; it only hands the same [`MessageQueueHandle`] to every task it builds.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors raised by a message queue backend
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Message queue is closed")]
    Closed,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// URL queue contract consumed by tasks
pub trait MessageQueue: Send + Sync {
    /// Offers URLs to the queue, returning how many were accepted
    fn put(&self, urls: &[String]) -> QueueResult<usize>;

    /// Takes the next URL, or `None` if the queue is currently empty
    fn get(&self) -> QueueResult<Option<String>>;

    /// Returns a URL a task took but could not process
    fn requeue(&self, url: String) -> QueueResult<()>;

    /// Number of URLs waiting
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle passed through to every task unchanged
pub type MessageQueueHandle = Arc<dyn MessageQueue>;

#[derive(Debug, Default)]
struct LocalState {
    pending: VecDeque<String>,
    seen: HashSet<String>,
    closed: bool,
}

/// In-process FIFO queue for local mode
///
/// A URL is accepted once for the lifetime of the queue; re-offering a URL
/// that was already queued or handed out is a no-op. Requeued URLs go to the
/// front.
#[derive(Debug, Default)]
pub struct LocalMessageQueue {
    state: Mutex<LocalState>,
}

impl LocalMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue holding `seeds`
    pub fn with_seeds(seeds: &[String]) -> Self {
        let queue = Self::new();
        {
            let mut state = queue.lock();
            for seed in seeds {
                if state.seen.insert(seed.clone()) {
                    state.pending.push_back(seed.clone());
                }
            }
        }
        queue
    }

    /// Rejects all further puts and gets
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Number of distinct URLs ever accepted
    pub fn seen_count(&self) -> usize {
        self.lock().seen.len()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MessageQueue for LocalMessageQueue {
    fn put(&self, urls: &[String]) -> QueueResult<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        let mut accepted = 0;
        for url in urls {
            if state.seen.insert(url.clone()) {
                state.pending.push_back(url.clone());
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn get(&self) -> QueueResult<Option<String>> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        Ok(state.pending.pop_front())
    }

    fn requeue(&self, url: String) -> QueueResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.pending.push_front(url);
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().pending.len()
    }
}
