//! Worker units: execution slots that run one job at a time.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use workpool_core::{Job, JobFault, WorkResult};

use crate::error::SupervisorResult;
use crate::handler::{JobLookup, LookupError};
use crate::pool::PoolError;

/// Where a unit is in its execute cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Idle,
    Working,
    Completed,
}

/// Snapshot of a unit's execution state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitState {
    pub lifecycle: Lifecycle,
    pub last_result: Option<WorkResult>,
}

/// Future returned by a completion observer.
pub type CompletionFuture = Pin<Box<dyn Future<Output = SupervisorResult<()>> + Send>>;

/// Notified exactly once when a unit finishes a job.
pub trait CompletionObserver: Send + Sync + 'static {
    fn on_complete(
        self: Arc<Self>,
        unit: Arc<WorkerUnit>,
        old_state: UnitState,
        new_state: UnitState,
    ) -> CompletionFuture;
}

/// A single execution slot owned by the pool.
#[derive(Debug)]
pub struct WorkerUnit {
    id: String,
    state: Mutex<UnitState>,
}

impl WorkerUnit {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            state: Mutex::new(UnitState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current execution state.
    pub fn state(&self) -> UnitState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `job` on a new task and notify `observer` when it finishes.
    ///
    /// Job faults never escape: they become an `Error` result. The returned
    /// handle only resolves to `Err` when the unit's own bookkeeping fails.
    pub fn execute(
        self: &Arc<Self>,
        job: Job,
        lookup: Arc<dyn JobLookup>,
        observer: Arc<dyn CompletionObserver>,
    ) -> JoinHandle<SupervisorResult<()>> {
        let unit = Arc::clone(self);
        tokio::spawn(async move {
            let worker_id = unit.id.clone();
            let outcome = unit.run(job, lookup, observer).await;
            if let Err(ref err) = outcome {
                tracing::error!(worker_id = %worker_id, "Worker bookkeeping failed: {}", err);
            }
            outcome
        })
    }

    async fn run(
        self: Arc<Self>,
        job: Job,
        lookup: Arc<dyn JobLookup>,
        observer: Arc<dyn CompletionObserver>,
    ) -> SupervisorResult<()> {
        self.update(|state| state.lifecycle = Lifecycle::Working)?;
        tracing::debug!(worker_id = %self.id, job_id = %job.id, "Executing {}", job.handler_id);

        let started = Instant::now();
        let result = invoke(job, lookup.as_ref()).await;
        let result = result.with_duration_ms(started.elapsed().as_millis() as u64);

        let (old_state, new_state) = self.update(|state| {
            state.lifecycle = Lifecycle::Completed;
            state.last_result = Some(result);
        })?;
        observer.on_complete(self, old_state, new_state).await
    }

    /// Back to idle after release; the last result is kept.
    pub(crate) fn reset(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lifecycle = Lifecycle::Idle;
    }

    fn update(&self, f: impl FnOnce(&mut UnitState)) -> Result<(UnitState, UnitState), PoolError> {
        let mut state = self.state.lock().map_err(|_| PoolError::Poisoned)?;
        let old = state.clone();
        f(&mut state);
        Ok((old, state.clone()))
    }
}

/// Resolve and run the handler, capturing any fault.
async fn invoke(job: Job, lookup: &dyn JobLookup) -> WorkResult {
    let call = async {
        match lookup.lookup(&job.handler_id) {
            Ok(handler) => handler.handle(job.args.clone()).await.map_err(JobFault::Failed),
            Err(LookupError::NotFound(id)) => Err(JobFault::HandlerNotFound(id)),
        }
    };

    let outcome = AssertUnwindSafe(call).catch_unwind().await;
    match outcome {
        Ok(Ok(output)) => WorkResult::pass(job, output),
        Ok(Err(fault)) => WorkResult::error(job, fault),
        Err(panic) => WorkResult::error(job, JobFault::Panicked(panic_message(panic))),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
