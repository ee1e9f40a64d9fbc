use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::CadenceError;
use crate::events::{EventBus, SchedulerEvent};
use crate::scheduler::{DispatchQueue, Job, JobStatus, ReadyQueue};
use crate::worker::executor::JobExecutor;

/// One execution loop of the worker pool.
pub struct Worker {
    id: usize,
    dispatch: DispatchQueue,
    ready: Arc<Mutex<ReadyQueue>>,
    executor: JobExecutor,
    events: EventBus,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        dispatch: DispatchQueue,
        ready: Arc<Mutex<ReadyQueue>>,
        executor: JobExecutor,
        events: EventBus,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            dispatch,
            ready,
            executor,
            events,
            retry,
            cancel,
        }
    }

    /// Pull and run jobs until cancelled. A job already executing when the
    /// stop arrives runs to completion first.
    pub async fn run(self) {
        tracing::info!(worker_id = self.id, "Worker started");
        loop {
            let Some(job) = self.dispatch.pop(&self.cancel).await else {
                if !self.cancel.is_cancelled() {
                    tracing::error!(
                        worker_id = self.id,
                        "Dispatch queue closed while the worker was running"
                    );
                }
                break;
            };
            self.process(job).await;
        }
        tracing::info!(worker_id = self.id, "Worker stopped");
    }

    /// Run one job through `QUEUED -> RUNNING -> COMPLETED | FAILED` and
    /// queue a retry if the job failed with attempts left. Returns the job
    /// in its final state.
    pub async fn process(&self, mut job: Job) -> Job {
        if let Err(e) = job.start(self.id, Utc::now()) {
            self.report_error(&job, &e);
            return job;
        }
        self.events.emit(SchedulerEvent::JobStarted {
            job_id: job.id,
            task_id: job.task_id,
            worker_id: self.id,
            attempt: job.attempt,
            at: job.updated_at,
        });

        let result = self.executor.execute(&job).await;
        let now = Utc::now();
        let transition = match result.status {
            JobStatus::Completed => job.complete(now),
            _ => job.fail(
                result.error.unwrap_or_else(|| "unknown failure".to_string()),
                now,
            ),
        };
        if let Err(e) = transition {
            self.report_error(&job, &e);
            return job;
        }

        match job.status {
            JobStatus::Completed => {
                self.events.emit(SchedulerEvent::JobCompleted {
                    job_id: job.id,
                    task_id: job.task_id,
                    worker_id: self.id,
                    attempt: job.attempt,
                    started_at: job.started_at,
                    at: now,
                });
            }
            _ => {
                self.events.emit(SchedulerEvent::JobFailed {
                    job_id: job.id,
                    task_id: job.task_id,
                    worker_id: self.id,
                    attempt: job.attempt,
                    reason: job.error.clone().unwrap_or_default(),
                    at: now,
                });
                self.handle_failure(&job, now).await;
            }
        }
        job
    }

    async fn handle_failure(&self, failed: &Job, now: DateTime<Utc>) {
        if !failed.can_retry() {
            self.events.emit(SchedulerEvent::JobExhausted {
                job_id: failed.id,
                task_id: failed.task_id,
                task_name: failed.task_name.clone(),
                attempts: failed.attempt,
                reason: failed.error.clone().unwrap_or_default(),
                at: now,
            });
            return;
        }

        let delay = failed.retry_policy.delay(failed.attempt, &self.retry);
        let run_time = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let next = failed.retry(run_time, now);

        self.events.emit(SchedulerEvent::job_created(&next, now));
        self.events.emit(SchedulerEvent::JobRetryScheduled {
            job_id: next.id,
            retry_of: failed.id,
            task_id: next.task_id,
            attempt: next.attempt,
            run_time,
            at: now,
        });

        if delay.is_zero() {
            self.ready.lock().await.add(next);
            return;
        }

        // Hold delayed retries outside the ready queue so a not-yet-due head
        // does not stall due jobs behind it.
        let ready = self.ready.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = %next.id, "Stopping; parking delayed retry in ready queue");
                }
            }
            ready.lock().await.add(next);
        });
    }

    fn report_error(&self, job: &Job, e: &CadenceError) {
        self.events.emit(SchedulerEvent::SchedulerError {
            task_id: Some(job.task_id),
            job_id: Some(job.id),
            error: e.to_string(),
            at: Utc::now(),
        });
    }
}
