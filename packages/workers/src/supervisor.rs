//! Supervisor: owns the pool and dispatcher for one start/stop cycle at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use ractor::{Actor, ActorRef, ActorStatus};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use workpool_core::{Config, PoolEvent};

use crate::dispatcher::{
    DispatchContext, Dispatcher, DispatcherArgs, DispatcherErrorHandler, DispatcherMessage,
    log_and_raise,
};
use crate::error::{SupervisorError, SupervisorResult};
use crate::handler::{JobHandlerRegistry, JobLookup};
use crate::pool::WorkerPool;
use crate::queue::QueueClient;
use crate::reporter::{ErrorReporter, LogReporter};

/// Options for a single `start` call.
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Stop the supervisor when the process receives ctrl-c.
    ///
    /// Listening for ctrl-c replaces the default SIGINT behaviour for the
    /// rest of the process's life, even after `stop` removes the hook. A
    /// library embedding the supervisor in a larger process should use
    /// `without_exit_hook` and handle interrupts itself.
    pub install_exit_hook: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            install_exit_hook: true,
        }
    }
}

impl StartOptions {
    /// Start without a ctrl-c hook; the caller is responsible for `stop`.
    pub fn without_exit_hook() -> Self {
        Self {
            install_exit_hook: false,
        }
    }
}

/// Partial configuration merged by `Supervisor::configure`.
#[derive(Default, Clone)]
pub struct ConfigPatch {
    pub max_workers: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_shutdown_wait_ms: Option<u64>,
    pub dispatcher_error_handler: Option<DispatcherErrorHandler>,
    pub job_lookup: Option<Arc<dyn JobLookup>>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    pub fn max_shutdown_wait_ms(mut self, ms: u64) -> Self {
        self.max_shutdown_wait_ms = Some(ms);
        self
    }

    /// Replace the infrastructure-fault policy.
    pub fn dispatcher_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(SupervisorError) -> SupervisorResult<()> + Send + Sync + 'static,
    {
        self.dispatcher_error_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the handler lookup.
    pub fn job_lookup(mut self, lookup: impl JobLookup) -> Self {
        self.job_lookup = Some(Arc::new(lookup));
        self
    }
}

impl From<Config> for ConfigPatch {
    fn from(config: Config) -> Self {
        Self {
            max_workers: Some(config.max_workers),
            poll_interval_ms: Some(config.poll_interval_ms),
            max_shutdown_wait_ms: Some(config.max_shutdown_wait_ms),
            ..Default::default()
        }
    }
}

/// Observable state of a running supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub working: usize,
    pub queues: Vec<String>,
    pub dispatcher_alive: bool,
}

/// Settings applied on the next start.
#[derive(Clone)]
struct Settings {
    config: Config,
    error_handler: DispatcherErrorHandler,
    lookup: Arc<dyn JobLookup>,
}

/// Live pieces of a start/stop cycle.
struct Running {
    context: Arc<DispatchContext>,
    dispatcher: ActorRef<DispatcherMessage>,
    handle: JoinHandle<()>,
    exit_hook: Option<JoinHandle<()>>,
    max_shutdown_wait: Duration,
}

struct SupervisorInner {
    settings: RwLock<Settings>,
    queue: Arc<dyn QueueClient>,
    reporter: Arc<dyn ErrorReporter>,
    event_tx: broadcast::Sender<PoolEvent>,
    /// Serialises start and stop.
    running: Mutex<Option<Running>>,
    /// Read side of the current cycle for status queries.
    current: RwLock<Option<(Arc<DispatchContext>, ActorRef<DispatcherMessage>)>>,
    active: watch::Sender<bool>,
}

/// Lifecycle owner of the worker pool and dispatcher.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

/// Builder for a `Supervisor`.
pub struct SupervisorBuilder {
    queue: Arc<dyn QueueClient>,
    lookup: Option<Arc<dyn JobLookup>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    error_handler: Option<DispatcherErrorHandler>,
    config: Config,
}

impl SupervisorBuilder {
    /// Set the handler lookup (defaults to an empty registry).
    pub fn with_lookup(mut self, lookup: impl JobLookup) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }

    /// Set the error reporter (defaults to `LogReporter`).
    pub fn with_reporter(mut self, reporter: impl ErrorReporter) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Set the infrastructure-fault policy (defaults to log and re-raise).
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(SupervisorError) -> SupervisorResult<()> + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Supervisor {
        let (event_tx, _) = broadcast::channel(1024);
        let (active, _) = watch::channel(false);
        let settings = Settings {
            config: self.config,
            error_handler: self.error_handler.unwrap_or_else(|| Arc::new(log_and_raise)),
            lookup: self
                .lookup
                .unwrap_or_else(|| Arc::new(JobHandlerRegistry::new())),
        };

        Supervisor {
            inner: Arc::new(SupervisorInner {
                settings: RwLock::new(settings),
                queue: self.queue,
                reporter: self.reporter.unwrap_or_else(|| Arc::new(LogReporter)),
                event_tx,
                running: Mutex::new(None),
                current: RwLock::new(None),
                active,
            }),
        }
    }
}

impl Supervisor {
    /// Start building a supervisor around a queue client.
    pub fn builder(queue: Arc<dyn QueueClient>) -> SupervisorBuilder {
        SupervisorBuilder {
            queue,
            lookup: None,
            reporter: None,
            error_handler: None,
            config: Config::default(),
        }
    }

    /// Merge `patch` into the settings used by the next `start`.
    ///
    /// A running pool is not affected.
    pub fn configure(&self, patch: ConfigPatch) -> SupervisorResult<()> {
        let mut settings = self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut config = settings.config.clone();
        if let Some(n) = patch.max_workers {
            config.max_workers = n;
        }
        if let Some(ms) = patch.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = patch.max_shutdown_wait_ms {
            config.max_shutdown_wait_ms = ms;
        }
        config.validate()?;

        settings.config = config;
        if let Some(handler) = patch.dispatcher_error_handler {
            settings.error_handler = handler;
        }
        if let Some(lookup) = patch.job_lookup {
            settings.lookup = lookup;
        }
        Ok(())
    }

    /// The configuration the next `start` will use.
    pub fn config(&self) -> Config {
        self.settings().config
    }

    /// Provision the pool, register `queues`, and launch the dispatcher.
    pub async fn start<I, S>(&self, queues: I, opts: StartOptions) -> SupervisorResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let watched: Vec<String> = queues.into_iter().map(Into::into).collect();
        if watched.is_empty() {
            return Err(SupervisorError::NoQueues);
        }

        let mut slot = self.inner.running.lock().await;
        if slot.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let Settings {
            config,
            error_handler,
            lookup,
        } = self.settings();
        config.validate()?;

        self.inner.queue.register(&watched).await?;

        let run_flag = Arc::new(AtomicBool::new(false));
        let context = Arc::new(DispatchContext {
            pool: Arc::new(WorkerPool::new(config.max_workers)),
            queue: self.inner.queue.clone(),
            lookup,
            reporter: self.inner.reporter.clone(),
            error_handler,
            event_tx: self.inner.event_tx.clone(),
            watched: watched.clone(),
            running: run_flag.clone(),
            dispatcher: OnceLock::new(),
        });
        run_flag.store(true, Ordering::SeqCst);

        let args = DispatcherArgs {
            context: context.clone(),
            poll_interval: config.poll_interval(),
        };
        let (dispatcher, handle) = match Actor::spawn(None, Dispatcher, args).await {
            Ok(spawned) => spawned,
            Err(err) => {
                run_flag.store(false, Ordering::SeqCst);
                if let Err(e) = self.inner.queue.unregister(&watched).await {
                    tracing::warn!("Failed to unregister queues after spawn failure: {}", e);
                }
                return Err(SupervisorError::Spawn(err.to_string()));
            }
        };

        let exit_hook = opts.install_exit_hook.then(|| self.spawn_exit_hook());

        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some((context.clone(), dispatcher.clone()));
        *slot = Some(Running {
            context,
            dispatcher,
            handle,
            exit_hook,
            max_shutdown_wait: config.max_shutdown_wait(),
        });
        self.inner.active.send_replace(true);

        tracing::info!(
            "Supervisor started with {} workers on [{}]",
            config.max_workers,
            watched.join(", ")
        );
        let _ = self.inner.event_tx.send(PoolEvent::SupervisorStarted {
            queues: watched,
            max_workers: config.max_workers,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    /// Halt dispatch, wait (bounded) for in-flight jobs, unregister queues,
    /// and terminate the dispatcher. A no-op when not running.
    ///
    /// A dispatcher still inside a queue call when `max_shutdown_wait`
    /// elapses is killed rather than awaited.
    pub async fn stop(&self) -> SupervisorResult<()> {
        let mut slot = self.inner.running.lock().await;
        let Some(Running {
            context,
            dispatcher,
            mut handle,
            exit_hook,
            max_shutdown_wait,
        }) = slot.take()
        else {
            return Ok(());
        };

        context.running.store(false, Ordering::SeqCst);
        // Stops after the current iteration; a sleeping dispatcher wakes now.
        dispatcher.stop(Some("supervisor stopping".to_string()));
        let deadline = tokio::time::Instant::now() + max_shutdown_wait;
        tracing::info!(
            "Stopping supervisor, waiting up to {}ms for {} in-flight jobs",
            max_shutdown_wait.as_millis(),
            context.pool.working_count()
        );

        let drained = tokio::time::timeout_at(deadline, context.pool.wait_drained())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                "Shutdown wait elapsed with {} jobs still running",
                context.pool.working_count()
            );
        }

        let unregistered = self.inner.queue.unregister(&context.watched).await;
        if let Err(ref err) = unregistered {
            tracing::warn!("Failed to unregister queues: {}", err);
        }

        let joined = match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!("Dispatcher still busy after the shutdown wait, killing it");
                dispatcher.kill();
                handle.await
            }
        };
        if let Err(err) = joined {
            tracing::warn!("Dispatcher task ended abnormally: {}", err);
        }

        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.active.send_replace(false);
        let _ = self.inner.event_tx.send(PoolEvent::SupervisorStopped {
            drained,
            timestamp: Utc::now(),
        });
        tracing::info!("Supervisor stopped");

        // May be the hook's own task; nothing below awaits.
        if let Some(hook) = exit_hook {
            hook.abort();
        }
        unregistered.map_err(Into::into)
    }

    /// Whether a start/stop cycle is active.
    pub fn is_running(&self) -> bool {
        *self.inner.active.borrow()
    }

    /// Wait until the current cycle (if any) has been stopped.
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|active| !*active).await;
    }

    /// Snapshot of the running pool, or `None` when stopped.
    pub fn status(&self) -> Option<PoolStatus> {
        let current = self
            .inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let (context, dispatcher) = current.as_ref()?;
        let snapshot = context.pool.snapshot().ok()?;
        Some(PoolStatus {
            idle: snapshot.idle.len(),
            working: snapshot.working.len(),
            queues: context.watched.clone(),
            dispatcher_alive: matches!(
                dispatcher.get_status(),
                ActorStatus::Starting | ActorStatus::Running
            ),
        })
    }

    /// Subscribe to lifecycle and job events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.event_tx.subscribe()
    }

    fn settings(&self) -> Settings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn spawn_exit_hook(&self) -> JoinHandle<()> {
        let inner: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Could not listen for ctrl-c: {}", err);
                return;
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            tracing::info!("Interrupt received, stopping supervisor");
            if let Err(err) = (Supervisor { inner }).stop().await {
                tracing::error!("Supervisor stop failed: {}", err);
            }
        })
    }
}
