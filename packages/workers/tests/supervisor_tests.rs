#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use common::{
    FailingQueue, OneShotQueue, SlowQueue, WAIT, channel_reporter, eventually, handlers,
    next_event,
};
use workers::{
    Config, ConfigPatch, Job, JobFault, MemoryQueue, PoolEvent, StartOptions, Supervisor,
    SupervisorError, WorkStatus,
};

fn config(max_workers: usize, poll_interval_ms: u64, max_shutdown_wait_ms: u64) -> Config {
    Config::default()
        .with_max_workers(max_workers)
        .with_poll_interval_ms(poll_interval_ms)
        .with_max_shutdown_wait_ms(max_shutdown_wait_ms)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_jobs_reach_the_reporter_and_passes_do_not() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(MemoryQueue::new());
    queue.push("default", "identity", vec![json!("foo")])?;
    let failing = queue.push("default", "divide", vec![json!(1), json!(0)])?;

    let (reporter, mut reported) = channel_reporter();
    let supervisor = Supervisor::builder(queue.clone())
        .with_lookup(handlers())
        .with_reporter(reporter)
        .with_config(config(2, 10, 1_000))
        .build();
    let mut events = supervisor.subscribe();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;

    let result = tokio::time::timeout(WAIT, reported.recv())
        .await?
        .ok_or("reporter channel closed")?;
    assert_eq!(result.status, WorkStatus::Error);
    assert_eq!(result.job, failing);
    assert_eq!(result.queue, "default");
    assert_eq!(
        result.exception,
        Some(JobFault::Panicked("attempt to divide by zero".into()))
    );

    let passed = next_event(&mut events, |e| {
        matches!(
            e,
            PoolEvent::JobFinished {
                status: WorkStatus::Pass,
                ..
            }
        )
    })
    .await?;
    assert!(passed.job_id().is_some());

    supervisor.stop().await?;
    assert!(reported.try_recv().is_err(), "passing job was reported");
    assert!(queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_is_idempotent_and_unregisters() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(MemoryQueue::new());
    let supervisor = Supervisor::builder(queue.clone())
        .with_config(config(1, 10, 100))
        .build();

    supervisor.stop().await?;

    supervisor
        .start(["high", "low"], StartOptions::without_exit_hook())
        .await?;
    assert!(supervisor.is_running());
    assert_eq!(queue.registered(), vec!["high".to_string(), "low".to_string()]);

    supervisor.stop().await?;
    supervisor.stop().await?;
    assert!(!supervisor.is_running());
    assert!(supervisor.status().is_none());
    assert!(queue.registered().is_empty());
    Ok(())
}

#[tokio::test]
async fn overlapping_start_is_rejected() -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::builder(Arc::new(MemoryQueue::new()))
        .with_config(config(1, 10, 100))
        .build();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    let second = supervisor
        .start(["other"], StartOptions::without_exit_hook())
        .await;
    assert!(matches!(second, Err(SupervisorError::AlreadyRunning)));

    let status = supervisor.status().ok_or("not running")?;
    assert_eq!(status.queues, vec!["default".to_string()]);

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test]
async fn start_requires_a_queue() {
    let supervisor = Supervisor::builder(Arc::new(MemoryQueue::new())).build();
    let result = supervisor
        .start(Vec::<String>::new(), StartOptions::without_exit_hook())
        .await;
    assert!(matches!(result, Err(SupervisorError::NoQueues)));
    assert!(!supervisor.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_polling_never_leaves_a_worker_reserved() -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::builder(Arc::new(MemoryQueue::new()))
        .with_config(config(3, 1, 100))
        .build();
    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let status = supervisor.status().ok_or("not running")?;
        assert_eq!(status.idle + status.working, 3);
    }

    // Each reservation is released inside the same dispatch step.
    assert!(eventually(|| supervisor.status().is_some_and(|s| s.working == 0)).await);

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_is_bounded_when_a_job_hangs() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(MemoryQueue::new());
    queue.push("default", "hang", vec![])?;

    let supervisor = Supervisor::builder(queue)
        .with_lookup(handlers())
        .with_config(config(1, 10, 200))
        .build();
    let mut events = supervisor.subscribe();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    next_event(&mut events, |e| matches!(e, PoolEvent::JobStarted { .. })).await?;

    let started = Instant::now();
    supervisor.stop().await?;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1_200), "took {:?}", elapsed);

    let stopped = next_event(&mut events, |e| {
        matches!(e, PoolEvent::SupervisorStopped { .. })
    })
    .await?;
    assert!(matches!(stopped, PoolEvent::SupervisorStopped { drained: false, .. }));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completion_picks_up_waiting_work_before_the_next_tick() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(MemoryQueue::new());
    for n in 0..3 {
        queue.push("default", "identity", vec![json!(n)])?;
    }

    // One worker and a poll interval far beyond the test timeout: only
    // completion-triggered dispatch can drain the queue.
    let supervisor = Supervisor::builder(queue.clone())
        .with_lookup(handlers())
        .with_config(config(1, 60_000, 1_000))
        .build();
    let mut events = supervisor.subscribe();

    let started = Instant::now();
    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    for _ in 0..3 {
        next_event(&mut events, |e| matches!(e, PoolEvent::JobFinished { .. })).await?;
    }
    assert!(started.elapsed() < WAIT);
    assert!(queue.is_empty());

    // The dispatcher is asleep for a minute; stop must interrupt it.
    let stopping = Instant::now();
    supervisor.stop().await?;
    assert!(stopping.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatcher_fault_is_fatal_by_default() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(FailingQueue::default());
    let supervisor = Supervisor::builder(queue.clone())
        .with_config(config(2, 5, 100))
        .build();
    let mut events = supervisor.subscribe();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    let failed = next_event(&mut events, |e| {
        matches!(e, PoolEvent::DispatcherFailed { .. })
    })
    .await?;
    assert!(failed.description().contains("connection refused"));

    assert!(eventually(|| supervisor.status().is_some_and(|s| !s.dispatcher_alive)).await);
    let attempts = queue.attempts();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.attempts(), attempts, "dispatcher kept polling");

    let status = supervisor.status().ok_or("not running")?;
    assert_eq!(status.working, 0);

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_error_handler_keeps_the_loop_alive() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(FailingQueue::default());
    let supervisor = Supervisor::builder(queue.clone())
        .with_config(config(1, 5, 100))
        .with_error_handler(|err| {
            tracing::debug!("ignoring {}", err);
            Ok(())
        })
        .build();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    assert!(eventually(|| queue.attempts() >= 5).await);

    let status = supervisor.status().ok_or("not running")?;
    assert!(status.dispatcher_alive);
    assert_eq!(status.working, 0);

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test]
async fn configuration_applies_on_the_next_start() -> Result<(), Box<dyn Error>> {
    let supervisor = Supervisor::builder(Arc::new(MemoryQueue::new()))
        .with_config(config(1, 50, 100))
        .build();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    supervisor.configure(ConfigPatch::new().max_workers(3))?;
    assert_eq!(supervisor.status().map(|s| s.idle + s.working), Some(1));

    let invalid = supervisor.configure(ConfigPatch::new().max_workers(0));
    assert!(matches!(invalid, Err(SupervisorError::Config(_))));
    assert_eq!(supervisor.config().max_workers, 3);

    supervisor.stop().await?;
    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    assert_eq!(supervisor.status().map(|s| s.idle + s.working), Some(3));

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_lookup_replaces_the_default() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(MemoryQueue::new());
    queue.push("default", "identity", vec![json!("foo")])?;

    let (reporter, mut reported) = channel_reporter();
    let supervisor = Supervisor::builder(queue)
        .with_reporter(reporter)
        .with_config(config(1, 10, 100))
        .build();
    supervisor.configure(ConfigPatch::new().job_lookup(handlers()))?;
    let mut events = supervisor.subscribe();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    next_event(&mut events, |e| {
        matches!(
            e,
            PoolEvent::JobFinished {
                status: WorkStatus::Pass,
                ..
            }
        )
    })
    .await?;

    supervisor.stop().await?;
    assert!(reported.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn unknown_handler_is_reported_not_raised() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(MemoryQueue::new());
    queue.push_payload("default", r#"{"class":"missing","args":[1]}"#)?;

    let (reporter, mut reported) = channel_reporter();
    let supervisor = Supervisor::builder(queue)
        .with_reporter(reporter)
        .with_config(config(1, 10, 100))
        .build();
    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;

    let result = tokio::time::timeout(WAIT, reported.recv())
        .await?
        .ok_or("reporter channel closed")?;
    assert_eq!(
        result.exception,
        Some(JobFault::HandlerNotFound("missing".into()))
    );
    assert!(supervisor.status().is_some_and(|s| s.dispatcher_alive));

    supervisor.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_does_not_wait_out_a_slow_dequeue() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(SlowQueue {
        delay: Duration::from_secs(3),
    });
    let supervisor = Supervisor::builder(queue)
        .with_config(config(1, 10, 100))
        .build();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    supervisor.stop().await?;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
    assert!(!supervisor.is_running());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fault_during_completion_dispatch_stops_the_dispatcher() -> Result<(), Box<dyn Error>> {
    let job = Job::new("default", "identity", vec![json!("foo")]);
    let queue = Arc::new(OneShotQueue::new(job));

    // The next tick is a minute away, so only the completion can hit the fault.
    let supervisor = Supervisor::builder(queue)
        .with_lookup(handlers())
        .with_config(config(1, 60_000, 100))
        .build();
    let mut events = supervisor.subscribe();

    supervisor
        .start(["default"], StartOptions::without_exit_hook())
        .await?;
    next_event(&mut events, |e| matches!(e, PoolEvent::JobFinished { .. })).await?;
    let failed = next_event(&mut events, |e| {
        matches!(e, PoolEvent::DispatcherFailed { .. })
    })
    .await?;
    assert!(failed.description().contains("backend went away"));

    assert!(eventually(|| supervisor.status().is_some_and(|s| !s.dispatcher_alive)).await);
    assert_eq!(supervisor.status().map(|s| s.working), Some(0));

    supervisor.stop().await?;
    Ok(())
}
