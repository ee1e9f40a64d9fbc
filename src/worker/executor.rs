use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::CadenceError;
use crate::scheduler::{Job, JobStatus};
use crate::worker::handler::HandlerRegistry;

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Runs jobs through the handler registered for their type.
///
/// Each execution runs in its own tokio task under the job's timeout:
/// - a handler error marks the job failed with the handler's reason
/// - a panicking handler marks the job failed without affecting the worker
/// - exceeding the timeout aborts the handler task and marks the job failed
#[derive(Debug, Clone)]
pub struct JobExecutor {
    handlers: Arc<HandlerRegistry>,
}

impl JobExecutor {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub async fn execute(&self, job: &Job) -> ExecutionResult {
        let started = Instant::now();
        let Some(handler) = self.handlers.get(&job.job_type) else {
            let error = CadenceError::NoHandler(job.job_type.clone());
            return Self::process_output(job.id, Err(error.to_string()), started.elapsed());
        };

        let owned = job.clone();
        let mut handle = tokio::spawn(async move { handler.execute(&owned).await });

        let result = match tokio::time::timeout(job.timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_panic() => Err("handler panicked".to_string()),
            Ok(Err(e)) => Err(format!("handler task ended unexpectedly: {}", e)),
            Err(_) => {
                handle.abort();
                Err(format!("timed out after {:?}", job.timeout))
            }
        };

        Self::process_output(job.id, result, started.elapsed())
    }

    fn process_output(
        job_id: Uuid,
        result: Result<(), String>,
        elapsed: Duration,
    ) -> ExecutionResult {
        match result {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, elapsed_ms = elapsed.as_millis() as u64, "Handler succeeded");
                ExecutionResult {
                    job_id,
                    status: JobStatus::Completed,
                    error: None,
                    elapsed,
                }
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Handler failed");
                ExecutionResult {
                    job_id,
                    status: JobStatus::Failed,
                    error: Some(e),
                    elapsed,
                }
            }
        }
    }
}
