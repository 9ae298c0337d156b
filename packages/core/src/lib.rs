//! Core domain types for the worker supervisor.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobId and JobPayload for work items
//! - WorkResult and JobFault for execution outcomes
//! - Config for pool sizing and timing
//! - Events for lifecycle observation

mod config;
mod events;
mod job;
mod result;

pub use config::{Config, ConfigError};
pub use events::PoolEvent;
pub use job::{Job, JobId, JobPayload};
pub use result::{JobFault, WorkResult, WorkStatus};
