//! Job handler trait, registry, and handler lookup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Result type for job handlers.
///
/// The error string is recorded verbatim as the job's fault.
pub type HandlerResult = Result<Value, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs with a given handler id are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The handler id this handler answers to.
    fn handler_id(&self) -> &str;

    /// Run the handler with the job's positional arguments.
    fn handle(&self, args: Vec<Value>) -> HandlerFuture;
}

/// Handler resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("handler not found: {0}")]
    NotFound(String),
}

/// Resolves a handler id to an invocable handler.
pub trait JobLookup: Send + Sync + 'static {
    fn lookup(&self, handler_id: &str) -> Result<Arc<dyn JobHandler>, LookupError>;
}

impl<F> JobLookup for F
where
    F: Fn(&str) -> Result<Arc<dyn JobHandler>, LookupError> + Send + Sync + 'static,
{
    fn lookup(&self, handler_id: &str) -> Result<Arc<dyn JobHandler>, LookupError> {
        self(handler_id)
    }
}

/// Registry for job handlers.
///
/// Maps handler ids to their handlers for dynamic dispatch. Built once at
/// startup and then shared read-only.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, returning the shared instance that lookups will yield.
    pub fn register<H: JobHandler>(&mut self, handler: H) -> Arc<dyn JobHandler> {
        let handler: Arc<dyn JobHandler> = Arc::new(handler);
        self.handlers
            .insert(handler.handler_id().to_string(), handler.clone());
        handler
    }

    /// Get a handler by id.
    pub fn get(&self, handler_id: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(handler_id).cloned()
    }

    /// Check if a handler exists for an id.
    pub fn has_handler(&self, handler_id: &str) -> bool {
        self.handlers.contains_key(handler_id)
    }

    /// List all registered handler ids.
    pub fn handler_ids(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

impl JobLookup for JobHandlerRegistry {
    fn lookup(&self, handler_id: &str) -> Result<Arc<dyn JobHandler>, LookupError> {
        self.get(handler_id)
            .ok_or_else(|| LookupError::NotFound(handler_id.to_string()))
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(Vec<Value>) -> HandlerFuture + Send + Sync + 'static,
{
    handler_id: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Vec<Value>) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler_id: impl Into<String>, handler: F) -> Self {
        Self {
            handler_id: handler_id.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> HandlerFuture + Send + Sync + 'static,
{
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    fn handle(&self, args: Vec<Value>) -> HandlerFuture {
        (self.handler)(args)
    }
}

/// Helper macro for creating job handlers from async bodies.
///
/// ```ignore
/// let echo = job_handler!("echo", |args| Ok(serde_json::Value::Array(args)));
/// ```
#[macro_export]
macro_rules! job_handler {
    ($handler_id:expr, |$args:ident| $body:expr) => {
        $crate::FnHandler::new(
            $handler_id,
            |$args: ::std::vec::Vec<::serde_json::Value>| -> $crate::HandlerFuture {
                ::std::boxed::Box::pin(async move { $body })
            },
        )
    };
}
