//! Job domain types for work items pulled from a queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire form of a job as stored in a queue backend.
///
/// `{"class": "<handler id>", "args": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Identifier used to resolve the handler.
    #[serde(rename = "class")]
    pub handler_id: String,
    /// Positional arguments passed to the handler.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A job dequeued from a watched queue.
///
/// Jobs are immutable once dequeued; workers only ever read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Handler identifier (used for routing to handlers).
    pub handler_id: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// The queue this job was dequeued from.
    pub origin_queue: String,
}

impl Job {
    /// Create a new job for the given queue.
    pub fn new(
        origin_queue: impl Into<String>,
        handler_id: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            id: JobId::new(),
            handler_id: handler_id.into(),
            args,
            origin_queue: origin_queue.into(),
        }
    }

    /// Decode a job from its wire payload.
    pub fn from_payload(
        origin_queue: impl Into<String>,
        payload: &str,
    ) -> Result<Self, serde_json::Error> {
        let JobPayload { handler_id, args } = serde_json::from_str(payload)?;
        Ok(Self::new(origin_queue, handler_id, args))
    }

    /// Encode this job as a wire payload.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&JobPayload {
            handler_id: self.handler_id.clone(),
            args: self.args.clone(),
        })
    }
}
