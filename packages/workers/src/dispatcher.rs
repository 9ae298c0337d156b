//! Dispatcher actor: matches idle workers to available jobs.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use workpool_core::{JobId, PoolEvent, WorkResult};

use crate::error::{SupervisorError, SupervisorResult};
use crate::handler::JobLookup;
use crate::pool::WorkerPool;
use crate::queue::QueueClient;
use crate::reporter::ErrorReporter;
use crate::unit::{CompletionFuture, CompletionObserver, UnitState, WorkerUnit};

/// Policy for infrastructure faults raised inside the dispatch loop.
///
/// Returning `Ok(())` swallows the fault and keeps the loop running; returning
/// an error terminates the dispatcher.
pub type DispatcherErrorHandler =
    Arc<dyn Fn(SupervisorError) -> SupervisorResult<()> + Send + Sync>;

/// Default policy: log the fault and re-raise it.
pub fn log_and_raise(err: SupervisorError) -> SupervisorResult<()> {
    tracing::error!("Dispatcher fault: {}", err);
    Err(err)
}

/// What a single dispatch attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A job was handed to a worker.
    Assigned { worker_id: String, job_id: JobId },
    /// A worker was reserved but no job was waiting; the worker was released.
    NoJob,
    /// Every worker was busy.
    NoIdleWorker,
    /// The run flag is cleared.
    Stopped,
}

/// State shared by the dispatcher actor and every worker completion.
pub(crate) struct DispatchContext {
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) queue: Arc<dyn QueueClient>,
    pub(crate) lookup: Arc<dyn JobLookup>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) error_handler: DispatcherErrorHandler,
    pub(crate) event_tx: broadcast::Sender<PoolEvent>,
    pub(crate) watched: Vec<String>,
    pub(crate) running: Arc<AtomicBool>,
    /// Set once the dispatcher actor has started.
    pub(crate) dispatcher: OnceLock<ActorRef<DispatcherMessage>>,
}

impl DispatchContext {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reserve a worker, try to dequeue a job, then assign or release.
    pub(crate) async fn dispatch_once(self: &Arc<Self>) -> SupervisorResult<DispatchOutcome> {
        if !self.is_running() {
            return Ok(DispatchOutcome::Stopped);
        }

        let Some(unit) = self.pool.reserve()? else {
            return Ok(DispatchOutcome::NoIdleWorker);
        };

        let job = match self.queue.dequeue(&self.watched).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.pool.release(&unit)?;
                return Ok(DispatchOutcome::NoJob);
            }
            Err(err) => {
                self.pool.release(&unit)?;
                return Err(err.into());
            }
        };

        let outcome = DispatchOutcome::Assigned {
            worker_id: unit.id().to_string(),
            job_id: job.id,
        };
        let _ = self.event_tx.send(PoolEvent::JobStarted {
            job_id: job.id,
            worker_id: unit.id().to_string(),
            queue: job.origin_queue.clone(),
            handler_id: job.handler_id.clone(),
            timestamp: Utc::now(),
        });

        let observer: Arc<dyn CompletionObserver> = self.clone();
        unit.execute(job, self.lookup.clone(), observer);
        Ok(outcome)
    }

    /// Route an infrastructure fault through the configured handler.
    pub(crate) fn handle_fault(&self, err: SupervisorError) -> SupervisorResult<()> {
        let description = err.to_string();
        let handled = (self.error_handler)(err);
        if handled.is_err() {
            let _ = self.event_tx.send(PoolEvent::DispatcherFailed {
                error: description,
                timestamp: Utc::now(),
            });
        }
        handled
    }

    /// Terminate the dispatcher after a fault raised outside its own loop.
    fn fail_dispatcher(&self, err: &SupervisorError) {
        if let Some(dispatcher) = self.dispatcher.get() {
            let _ = dispatcher.send_message(DispatcherMessage::Fail(err.to_string()));
        }
    }
}

impl CompletionObserver for DispatchContext {
    fn on_complete(
        self: Arc<Self>,
        unit: Arc<WorkerUnit>,
        _old_state: UnitState,
        new_state: UnitState,
    ) -> CompletionFuture {
        Box::pin(async move {
            let released = self.pool.release(&unit);

            let result = new_state.last_result;
            if let Some(ref result) = result {
                let _ = self.event_tx.send(PoolEvent::JobFinished {
                    job_id: result.job.id,
                    worker_id: unit.id().to_string(),
                    status: result.status,
                    duration_ms: result.duration_ms,
                    timestamp: Utc::now(),
                });
            }

            let redispatch = match released {
                // Pick up waiting work now instead of on the next tick.
                Ok(()) => match self.dispatch_once().await {
                    Ok(outcome) => {
                        tracing::debug!(worker_id = %unit.id(), ?outcome, "Completion dispatch");
                        Ok(())
                    }
                    Err(err) => self.handle_fault(err).inspect_err(|err| self.fail_dispatcher(err)),
                },
                Err(err) => Err(err.into()),
            };

            if let Some(result) = result.filter(WorkResult::is_error) {
                self.reporter.report(&result);
            }

            redispatch
        })
    }
}

/// Messages for the Dispatcher.
#[derive(Debug)]
pub(crate) enum DispatcherMessage {
    /// Run one dispatch iteration.
    Tick,
    /// A re-raised fault from a completion; terminates the actor.
    Fail(String),
}

/// Dispatcher actor arguments.
pub(crate) struct DispatcherArgs {
    pub(crate) context: Arc<DispatchContext>,
    pub(crate) poll_interval: Duration,
}

/// State for the dispatcher actor.
pub(crate) struct DispatcherState {
    context: Arc<DispatchContext>,
    poll_interval: Duration,
    /// Pending wake-up for the next tick.
    sleeper: Option<JoinHandle<()>>,
}

impl DispatcherState {
    fn schedule_tick(&mut self, myself: &ActorRef<DispatcherMessage>) {
        let myself = myself.clone();
        let delay = self.poll_interval;
        self.sleeper = Some(tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            let _ = myself.send_message(DispatcherMessage::Tick);
        }));
    }
}

/// Dispatcher actor: one reserve/dequeue/assign attempt per tick.
pub(crate) struct Dispatcher;

impl Actor for Dispatcher {
    type Msg = DispatcherMessage;
    type State = DispatcherState;
    type Arguments = DispatcherArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting dispatcher on [{}]",
            args.context.watched.join(", ")
        );
        let _ = args.context.dispatcher.set(myself.clone());
        myself.send_message(DispatcherMessage::Tick)?;

        Ok(DispatcherState {
            context: args.context,
            poll_interval: args.poll_interval,
            sleeper: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DispatcherMessage::Tick => {
                if !state.context.is_running() {
                    tracing::debug!("Run flag cleared, dispatcher idle");
                    return Ok(());
                }

                match state.context.dispatch_once().await {
                    Ok(outcome) => tracing::debug!(?outcome, "Dispatch tick"),
                    // Re-raised faults stop the actor.
                    Err(err) => state.context.handle_fault(err)?,
                }

                state.schedule_tick(&myself);
            }
            DispatcherMessage::Fail(reason) => {
                return Err(SupervisorError::Dispatcher(reason).into());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(sleeper) = state.sleeper.take() {
            sleeper.abort();
        }
        tracing::info!("Dispatcher stopped");
        Ok(())
    }
}
