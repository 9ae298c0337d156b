//! Infrastructure error types.
//!
//! Job faults are values inside `WorkResult`; everything here signals a
//! problem with the supervisor itself.

use thiserror::Error;
use workpool_core::ConfigError;

use crate::pool::PoolError;
use crate::queue::QueueError;

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Error type for supervisor, dispatcher, and pool operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor is already running")]
    AlreadyRunning,

    #[error("at least one queue must be watched")]
    NoQueues,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("failed to spawn dispatcher: {0}")]
    Spawn(String),

    #[error("dispatcher error: {0}")]
    Dispatcher(String),
}
