//! Scheduler events for observers.
//!
//! Every lifecycle step of a job is published on an [`EventBus`] and logged
//! through `tracing`. Subscribers that fall behind lose the oldest events
//! (`broadcast` lag semantics); scheduling never waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::scheduler::Job;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    JobCreated {
        job_id: Uuid,
        task_id: Uuid,
        task_name: String,
        run_time: DateTime<Utc>,
        priority: i32,
        attempt: u32,
        at: DateTime<Utc>,
    },
    JobPromoted {
        job_id: Uuid,
        task_id: Uuid,
        run_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    JobStarted {
        job_id: Uuid,
        task_id: Uuid,
        worker_id: usize,
        attempt: u32,
        at: DateTime<Utc>,
    },
    JobCompleted {
        job_id: Uuid,
        task_id: Uuid,
        worker_id: usize,
        attempt: u32,
        started_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    JobFailed {
        job_id: Uuid,
        task_id: Uuid,
        worker_id: usize,
        attempt: u32,
        reason: String,
        at: DateTime<Utc>,
    },
    JobRetryScheduled {
        job_id: Uuid,
        retry_of: Uuid,
        task_id: Uuid,
        attempt: u32,
        run_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The final attempt failed; no further retries follow.
    JobExhausted {
        job_id: Uuid,
        task_id: Uuid,
        task_name: String,
        attempts: u32,
        reason: String,
        at: DateTime<Utc>,
    },
    SchedulerError {
        task_id: Option<Uuid>,
        job_id: Option<Uuid>,
        error: String,
        at: DateTime<Utc>,
    },
    /// Undelivered jobs dropped from the dispatch queue at stop.
    JobsDiscarded { count: usize, at: DateTime<Utc> },
}

impl SchedulerEvent {
    pub fn job_created(job: &Job, at: DateTime<Utc>) -> Self {
        SchedulerEvent::JobCreated {
            job_id: job.id,
            task_id: job.task_id,
            task_name: job.task_name.clone(),
            run_time: job.run_time,
            priority: job.priority,
            attempt: job.attempt,
            at,
        }
    }

    pub fn job_promoted(job: &Job, at: DateTime<Utc>) -> Self {
        SchedulerEvent::JobPromoted {
            job_id: job.id,
            task_id: job.task_id,
            run_time: job.run_time,
            at,
        }
    }

    /// Job id this event refers to, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            SchedulerEvent::JobCreated { job_id, .. }
            | SchedulerEvent::JobPromoted { job_id, .. }
            | SchedulerEvent::JobStarted { job_id, .. }
            | SchedulerEvent::JobCompleted { job_id, .. }
            | SchedulerEvent::JobFailed { job_id, .. }
            | SchedulerEvent::JobRetryScheduled { job_id, .. }
            | SchedulerEvent::JobExhausted { job_id, .. } => Some(*job_id),
            SchedulerEvent::SchedulerError { job_id, .. } => *job_id,
            SchedulerEvent::JobsDiscarded { .. } => None,
        }
    }

    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            SchedulerEvent::JobCreated { task_id, .. }
            | SchedulerEvent::JobPromoted { task_id, .. }
            | SchedulerEvent::JobStarted { task_id, .. }
            | SchedulerEvent::JobCompleted { task_id, .. }
            | SchedulerEvent::JobFailed { task_id, .. }
            | SchedulerEvent::JobRetryScheduled { task_id, .. }
            | SchedulerEvent::JobExhausted { task_id, .. } => Some(*task_id),
            SchedulerEvent::SchedulerError { task_id, .. } => *task_id,
            SchedulerEvent::JobsDiscarded { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerEvent::JobCreated { .. } => "job_created",
            SchedulerEvent::JobPromoted { .. } => "job_promoted",
            SchedulerEvent::JobStarted { .. } => "job_started",
            SchedulerEvent::JobCompleted { .. } => "job_completed",
            SchedulerEvent::JobFailed { .. } => "job_failed",
            SchedulerEvent::JobRetryScheduled { .. } => "job_retry_scheduled",
            SchedulerEvent::JobExhausted { .. } => "job_exhausted",
            SchedulerEvent::SchedulerError { .. } => "scheduler_error",
            SchedulerEvent::JobsDiscarded { .. } => "jobs_discarded",
        }
    }

    fn log(&self) {
        match self {
            SchedulerEvent::JobCreated {
                job_id,
                task_id,
                task_name,
                attempt,
                ..
            } => {
                tracing::info!(job_id = %job_id, task_id = %task_id, task = %task_name, attempt, "Job created")
            }
            SchedulerEvent::JobPromoted { job_id, task_id, .. } => {
                tracing::debug!(job_id = %job_id, task_id = %task_id, "Job promoted to dispatch queue")
            }
            SchedulerEvent::JobStarted {
                job_id,
                task_id,
                worker_id,
                attempt,
                ..
            } => {
                tracing::info!(job_id = %job_id, task_id = %task_id, worker_id, attempt, "Job started")
            }
            SchedulerEvent::JobCompleted {
                job_id,
                task_id,
                worker_id,
                ..
            } => {
                tracing::info!(job_id = %job_id, task_id = %task_id, worker_id, "Job completed")
            }
            SchedulerEvent::JobFailed {
                job_id,
                task_id,
                worker_id,
                attempt,
                reason,
                ..
            } => {
                tracing::warn!(job_id = %job_id, task_id = %task_id, worker_id, attempt, reason = %reason, "Job failed")
            }
            SchedulerEvent::JobRetryScheduled {
                job_id,
                retry_of,
                attempt,
                run_time,
                ..
            } => {
                tracing::info!(job_id = %job_id, retry_of = %retry_of, attempt, run_time = %run_time, "Retry scheduled")
            }
            SchedulerEvent::JobExhausted {
                job_id,
                task_id,
                attempts,
                reason,
                ..
            } => {
                tracing::error!(job_id = %job_id, task_id = %task_id, attempts, reason = %reason, "Job failed permanently")
            }
            SchedulerEvent::SchedulerError {
                task_id,
                job_id,
                error,
                ..
            } => {
                tracing::error!(task_id = ?task_id, job_id = ?job_id, error = %error, "Scheduler error")
            }
            SchedulerEvent::JobsDiscarded { count, .. } => {
                tracing::warn!(count, "Discarded undelivered jobs on stop")
            }
        }
    }
}

/// Fan-out of scheduler events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Log the event and hand it to current subscribers.
    pub fn emit(&self, event: SchedulerEvent) {
        event.log();
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
