//! Worker pool supervisor.
//!
//! This crate runs jobs pulled from a shared queue on a bounded pool of
//! worker units.
//!
//! # Architecture
//!
//! - `Supervisor` - Owns the lifecycle: configure, start, stop
//! - `Dispatcher` - Ractor actor that reserves a worker, dequeues a job, and
//!   assigns or releases on every tick
//! - `WorkerPool` - Idle/working partition with atomic reserve and release
//! - `WorkerUnit` - Runs one job at a time on its own task and reports back
//!
//! # Usage
//!
//! ```ignore
//! use workers::{JobHandlerRegistry, MemoryQueue, StartOptions, Supervisor, job_handler};
//!
//! let mut handlers = JobHandlerRegistry::new();
//! handlers.register(job_handler!("echo", |args| Ok(serde_json::Value::Array(args))));
//!
//! let supervisor = Supervisor::builder(Arc::new(MemoryQueue::new()))
//!     .with_lookup(handlers)
//!     .build();
//! supervisor.start(["default"], StartOptions::default()).await?;
//! // ...
//! supervisor.stop().await?;
//! ```

mod dispatcher;
mod error;
mod handler;
mod pool;
mod queue;
mod reporter;
mod supervisor;
mod unit;

pub use dispatcher::{DispatchOutcome, DispatcherErrorHandler, log_and_raise};
pub use error::{SupervisorError, SupervisorResult};
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry, JobLookup,
    LookupError,
};
pub use pool::{PoolError, PoolSnapshot, WorkerPool};
pub use queue::{MemoryQueue, QueueClient, QueueError, QueueFuture};
pub use reporter::{ErrorReporter, LogReporter};
pub use supervisor::{ConfigPatch, PoolStatus, StartOptions, Supervisor, SupervisorBuilder};
pub use unit::{CompletionFuture, CompletionObserver, Lifecycle, UnitState, WorkerUnit};

/// Re-export core types for convenience.
pub use workpool_core::{Config, ConfigError, Job, JobFault, JobId, PoolEvent, WorkResult, WorkStatus};
