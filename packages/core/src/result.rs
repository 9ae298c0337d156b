//! Outcome types for a single job execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Job;

/// Whether a job execution passed or raised a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pass,
    Error,
}

impl WorkStatus {
    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pass => "pass",
            WorkStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault captured while resolving or running a job handler.
///
/// The message is kept exactly as the handler produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum JobFault {
    /// No handler is registered under the job's handler id.
    #[error("no handler registered for '{0}'")]
    HandlerNotFound(String),

    /// The handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobFault {
    /// The handler's own message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            JobFault::HandlerNotFound(id) => id,
            JobFault::Failed(msg) | JobFault::Panicked(msg) => msg,
        }
    }
}

/// The outcome of executing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub status: WorkStatus,
    /// The job that was executed.
    pub job: Job,
    /// Queue the job came from.
    pub queue: String,
    /// Captured fault when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<JobFault>,
    /// Value returned by the handler when `status` is `Pass`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Wall-clock execution time in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl WorkResult {
    /// A passing result carrying the handler's output.
    pub fn pass(job: Job, output: Value) -> Self {
        let queue = job.origin_queue.clone();
        Self {
            status: WorkStatus::Pass,
            job,
            queue,
            exception: None,
            output: Some(output),
            duration_ms: 0,
        }
    }

    /// A failing result carrying the captured fault.
    pub fn error(job: Job, fault: JobFault) -> Self {
        let queue = job.origin_queue.clone();
        Self {
            status: WorkStatus::Error,
            job,
            queue,
            exception: Some(fault),
            output: None,
            duration_ms: 0,
        }
    }

    /// Set the measured duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == WorkStatus::Error
    }
}
