//! Error reporting for failed jobs.

use workpool_core::WorkResult;

/// Receives the results of jobs that ended in `Error`.
///
/// Called from worker tasks, possibly concurrently; implementations must not
/// block for long.
pub trait ErrorReporter: Send + Sync + 'static {
    fn report(&self, result: &WorkResult);
}

impl<F> ErrorReporter for F
where
    F: Fn(&WorkResult) + Send + Sync + 'static,
{
    fn report(&self, result: &WorkResult) {
        self(result)
    }
}

/// Reporter that writes failed jobs to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, result: &WorkResult) {
        let fault = result
            .exception
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        tracing::warn!(
            job_id = %result.job.id,
            handler = %result.job.handler_id,
            queue = %result.queue,
            "Job failed: {}",
            fault
        );
    }
}
