//! Queue client seam and an in-process queue.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;
use workpool_core::Job;

/// Queue client errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode job payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Future type returned by queue client operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Access to the shared job queue backend.
///
/// All operations must be safe to call repeatedly. `dequeue` returning
/// `Ok(None)` means no job is currently available, not an error.
pub trait QueueClient: Send + Sync + 'static {
    /// Announce that this process is watching `queues`.
    fn register<'a>(&'a self, queues: &'a [String]) -> QueueFuture<'a, ()>;

    /// Withdraw a previous registration.
    fn unregister<'a>(&'a self, queues: &'a [String]) -> QueueFuture<'a, ()>;

    /// Pop the next job from the first of `queues` that has one.
    fn dequeue<'a>(&'a self, queues: &'a [String]) -> QueueFuture<'a, Option<Job>>;
}

#[derive(Default)]
struct MemoryQueueState {
    pending: HashMap<String, VecDeque<Job>>,
    registered: BTreeSet<String>,
}

/// In-process FIFO queue keyed by queue name.
///
/// Queues are scanned in the order given to `dequeue`, so earlier names take
/// precedence.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job built from a handler id and arguments.
    pub fn push(
        &self,
        queue: &str,
        handler_id: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Job, QueueError> {
        let job = Job::new(queue, handler_id, args);
        self.push_job(job.clone())?;
        Ok(job)
    }

    /// Enqueue a job from its wire payload.
    pub fn push_payload(&self, queue: &str, payload: &str) -> Result<Job, QueueError> {
        let job = Job::from_payload(queue, payload)?;
        self.push_job(job.clone())?;
        Ok(job)
    }

    /// Enqueue an already-built job on its origin queue.
    pub fn push_job(&self, job: Job) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state
            .pending
            .entry(job.origin_queue.clone())
            .or_default()
            .push_back(job);
        Ok(())
    }

    /// Number of jobs waiting on `queue`.
    pub fn len(&self, queue: &str) -> usize {
        self.lock()
            .map(|state| state.pending.get(queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Whether no jobs are waiting on any queue.
    pub fn is_empty(&self) -> bool {
        self.lock()
            .map(|state| state.pending.values().all(VecDeque::is_empty))
            .unwrap_or(true)
    }

    /// Names currently registered as watched.
    pub fn registered(&self) -> Vec<String> {
        self.lock()
            .map(|state| state.registered.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryQueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("memory queue lock poisoned".into()))
    }
}

impl QueueClient for MemoryQueue {
    fn register<'a>(&'a self, queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock()?;
            state.registered.extend(queues.iter().cloned());
            Ok(())
        })
    }

    fn unregister<'a>(&'a self, queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock()?;
            for queue in queues {
                state.registered.remove(queue);
            }
            Ok(())
        })
    }

    fn dequeue<'a>(&'a self, queues: &'a [String]) -> QueueFuture<'a, Option<Job>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            for queue in queues {
                if let Some(job) = state.pending.get_mut(queue).and_then(VecDeque::pop_front) {
                    return Ok(Some(job));
                }
            }
            Ok(None)
        })
    }
}
