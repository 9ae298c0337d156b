use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use workers::{
    Config, JobHandlerRegistry, MemoryQueue, PoolEvent, StartOptions, Supervisor, job_handler,
};

fn demo_handlers() -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();
    registry.register(job_handler!("echo", |args| Ok(Value::Array(args))));
    registry.register(job_handler!("sleep", |args| {
        let ms = args.first().and_then(Value::as_u64).unwrap_or(100);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept_ms": ms }))
    }));
    registry.register(job_handler!("fail", |args| {
        Err(format!("asked to fail with {} args", args.len()))
    }));
    registry
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let mut queues: Vec<String> = std::env::args().skip(1).collect();
    if queues.is_empty() {
        queues.push("default".to_string());
    }

    let queue = Arc::new(MemoryQueue::new());
    for (n, name) in queues.iter().enumerate() {
        queue.push(name, "echo", vec![json!(name), json!(n)])?;
        queue.push(name, "sleep", vec![json!(250)])?;
        queue.push(name, "fail", vec![])?;
    }

    let supervisor = Supervisor::builder(queue)
        .with_lookup(demo_handlers())
        .with_config(config)
        .build();

    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, PoolEvent::JobStarted { .. }) {
                tracing::debug!("{}", event.description());
            } else {
                tracing::info!("{}", event.description());
            }
        }
    });

    supervisor.start(queues, StartOptions::default()).await?;
    tracing::info!("Runner ready, press ctrl-c to stop");
    supervisor.wait_stopped().await;

    tracing::info!("Runner shutdown complete");
    Ok(())
}
