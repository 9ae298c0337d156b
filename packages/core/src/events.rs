//! Event types for observing the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, WorkStatus};

/// Events emitted by the supervisor over its broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// The supervisor provisioned its pool and began watching queues.
    SupervisorStarted {
        queues: Vec<String>,
        max_workers: usize,
        timestamp: DateTime<Utc>,
    },
    /// A worker was assigned a job.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        queue: String,
        handler_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker finished a job, whether it passed or not.
    JobFinished {
        job_id: JobId,
        worker_id: String,
        status: WorkStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The dispatcher hit an infrastructure fault that its error handler re-raised.
    DispatcherFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The supervisor stopped. `drained` is false if the shutdown wait elapsed
    /// with jobs still in flight.
    SupervisorStopped {
        drained: bool,
        timestamp: DateTime<Utc>,
    },
}

impl PoolEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PoolEvent::SupervisorStarted { timestamp, .. } => *timestamp,
            PoolEvent::JobStarted { timestamp, .. } => *timestamp,
            PoolEvent::JobFinished { timestamp, .. } => *timestamp,
            PoolEvent::DispatcherFailed { timestamp, .. } => *timestamp,
            PoolEvent::SupervisorStopped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            PoolEvent::JobStarted { job_id, .. } => Some(*job_id),
            PoolEvent::JobFinished { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            PoolEvent::SupervisorStarted {
                queues,
                max_workers,
                ..
            } => format!(
                "Supervisor started with {} workers on [{}]",
                max_workers,
                queues.join(", ")
            ),
            PoolEvent::JobStarted {
                job_id,
                worker_id,
                handler_id,
                ..
            } => format!("Job {} ({}) started by {}", job_id, handler_id, worker_id),
            PoolEvent::JobFinished {
                job_id,
                status,
                duration_ms,
                ..
            } => format!("Job {} finished with {} in {}ms", job_id, status, duration_ms),
            PoolEvent::DispatcherFailed { error, .. } => format!("Dispatcher failed: {}", error),
            PoolEvent::SupervisorStopped { drained, .. } => {
                let suffix = if *drained { "" } else { " (jobs still in flight)" };
                format!("Supervisor stopped{}", suffix)
            }
        }
    }
}
