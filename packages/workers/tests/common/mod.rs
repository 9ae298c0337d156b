#![allow(dead_code)]

use std::error::Error;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use workers::{
    Job, JobHandlerRegistry, PoolEvent, QueueClient, QueueError, QueueFuture, WorkResult,
    job_handler,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Handlers shared by the supervisor tests.
pub fn handlers() -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();
    registry.register(job_handler!("identity", |args| {
        Ok(args.into_iter().next().unwrap_or(Value::Null))
    }));
    registry.register(job_handler!("divide", |args| {
        let a = args.first().and_then(Value::as_i64).unwrap_or_default();
        let b = args.get(1).and_then(Value::as_i64).unwrap_or_default();
        Ok(json!(a / b))
    }));
    registry.register(job_handler!("hang", |_args| {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }));
    registry
}

/// Reporter that forwards every failed result to a channel.
pub fn channel_reporter() -> (
    impl Fn(&WorkResult) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<WorkResult>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = move |result: &WorkResult| {
        let _ = tx.send(result.clone());
    };
    (reporter, rx)
}

/// Wait for the first event matching `pred`.
pub async fn next_event<F>(
    rx: &mut broadcast::Receiver<PoolEvent>,
    pred: F,
) -> Result<PoolEvent, Box<dyn Error>>
where
    F: Fn(&PoolEvent) -> bool,
{
    let event = tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await?;
            if pred(&event) {
                return Ok::<_, broadcast::error::RecvError>(event);
            }
        }
    })
    .await??;
    Ok(event)
}

/// Poll `check` until it holds or the wait elapses.
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Queue whose dequeue always fails, counting attempts.
#[derive(Default)]
pub struct FailingQueue {
    pub dequeues: AtomicUsize,
}

impl FailingQueue {
    pub fn attempts(&self) -> usize {
        self.dequeues.load(Ordering::SeqCst)
    }
}

impl QueueClient for FailingQueue {
    fn register<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn unregister<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn dequeue<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, Option<Job>> {
        Box::pin(async move {
            self.dequeues.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Unavailable("connection refused".into()))
        })
    }
}

/// Queue whose dequeue takes `delay` before reporting no work.
pub struct SlowQueue {
    pub delay: Duration,
}

impl QueueClient for SlowQueue {
    fn register<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn unregister<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn dequeue<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, Option<Job>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(None)
        })
    }
}

/// Queue that hands out one job and then fails every dequeue.
pub struct OneShotQueue {
    job: Mutex<Option<Job>>,
}

impl OneShotQueue {
    pub fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(Some(job)),
        }
    }
}

impl QueueClient for OneShotQueue {
    fn register<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn unregister<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn dequeue<'a>(&'a self, _queues: &'a [String]) -> QueueFuture<'a, Option<Job>> {
        Box::pin(async move {
            let next = self
                .job
                .lock()
                .map_err(|_| QueueError::Unavailable("lock poisoned".into()))?
                .take();
            match next {
                Some(job) => Ok(Some(job)),
                None => Err(QueueError::Unavailable("backend went away".into())),
            }
        })
    }
}
