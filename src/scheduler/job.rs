use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CadenceError, Result};
use crate::task::{RetryPolicy, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One execution attempt of a task.
///
/// The task's name, type and retry settings are copied in so a job can run
/// and be retried after its one-shot task has left the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub job_type: String,
    pub run_time: DateTime<Utc>,
    pub priority: i32,
    pub status: JobStatus,
    /// 1 for the first run, incremented on each retry.
    pub attempt: u32,
    pub max_retries: u32,
    pub retry_policy: RetryPolicy,
    pub timeout: Duration,
    pub worker_id: Option<usize>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Job for the run of `task` at its current schedule time.
    pub fn for_task(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            task_name: task.name.clone(),
            job_type: task.job_type.clone(),
            run_time: task.schedule_time,
            priority: task.priority,
            status: JobStatus::Queued,
            attempt: 1,
            max_retries: task.max_retries,
            retry_policy: task.retry_policy,
            timeout: task.timeout,
            worker_id: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Whether a failed job may be followed by another attempt.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.attempt < self.max_retries
    }

    /// New queued job for the next attempt of the same task. The failed job
    /// itself is left untouched.
    pub fn retry(&self, run_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: self.task_id,
            task_name: self.task_name.clone(),
            job_type: self.job_type.clone(),
            run_time,
            priority: self.priority,
            status: JobStatus::Queued,
            attempt: self.attempt + 1,
            max_retries: self.max_retries,
            retry_policy: self.retry_policy,
            timeout: self.timeout,
            worker_id: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != from {
            return Err(CadenceError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// QUEUED -> RUNNING, owned by `worker_id`.
    pub fn start(&mut self, worker_id: usize, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Queued, JobStatus::Running)?;
        self.worker_id = Some(worker_id);
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING -> COMPLETED
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Completed)?;
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING -> FAILED
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Failed)?;
        self.error = Some(reason.into());
        self.finished_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}
