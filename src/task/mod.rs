//! Task definitions and the task store collaborator.
//!
//! A [`Task`] is the registered, schedulable unit of work. The scheduler
//! turns a due task into a [`Job`](crate::scheduler::Job) and either re-arms
//! the task (recurring) or removes it from the [`TaskStore`] (one-shot).

pub mod store;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::{CadenceError, Result};

pub use store::{InMemoryTaskStore, TaskStore};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a failed job waits before its retry is queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryPolicy {
    #[default]
    FixedDelay,
    ExponentialBackoff,
}

impl RetryPolicy {
    /// Delay before retrying a job whose `attempt`-th run just failed.
    pub fn delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        match self {
            RetryPolicy::FixedDelay => config.fixed_delay(),
            RetryPolicy::ExponentialBackoff => {
                let exponent = attempt.saturating_sub(1).min(31);
                config
                    .backoff_base()
                    .saturating_mul(1u32 << exponent)
                    .min(config.backoff_max())
            }
        }
    }
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryPolicy::FixedDelay => write!(f, "fixed_delay"),
            RetryPolicy::ExponentialBackoff => write!(f, "exponential_backoff"),
        }
    }
}

/// Options accepted by `submit_task`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Lower is more urgent.
    pub priority: i32,
    pub retry_policy: RetryPolicy,
    /// Total attempts allowed, including the first run.
    pub max_retries: u32,
    pub repeat_interval: Option<Duration>,
    pub timeout: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            retry_policy: RetryPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            repeat_interval: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TaskOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry(mut self, retry_policy: RetryPolicy, max_retries: u32) -> Self {
        self.retry_policy = retry_policy;
        self.max_retries = max_retries;
        self
    }

    pub fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = Some(interval);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(CadenceError::InvalidOptions(
                "timeout must be positive".to_string(),
            ));
        }
        if let Some(interval) = self.repeat_interval {
            if interval.is_zero() {
                return Err(CadenceError::InvalidOptions(
                    "repeat_interval must be positive".to_string(),
                ));
            }
            TimeDelta::from_std(interval).map_err(|_| {
                CadenceError::InvalidOptions(format!(
                    "repeat_interval {:?} is out of range",
                    interval
                ))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    /// Next time this task is due.
    pub schedule_time: DateTime<Utc>,
    pub priority: i32,
    pub retry_policy: RetryPolicy,
    pub max_retries: u32,
    pub repeat_interval: Option<Duration>,
    pub timeout: Duration,
    pub run_count: u64,
    /// Run time of the most recent job created for this task.
    pub last_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        job_type: impl Into<String>,
        schedule_time: DateTime<Utc>,
        options: TaskOptions,
    ) -> Result<Self> {
        options.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            job_type: job_type.into(),
            schedule_time,
            priority: options.priority,
            retry_policy: options.retry_policy,
            max_retries: options.max_retries,
            repeat_interval: options.repeat_interval,
            timeout: options.timeout,
            run_count: 0,
            last_run_time: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_recurring(&self) -> bool {
        self.repeat_interval.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule_time <= now
    }

    /// Next due time of a recurring task: one interval after the last run,
    /// or the current schedule time if it has never run. `None` for one-shot
    /// tasks and for intervals that overflow the calendar.
    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        let interval = TimeDelta::from_std(self.repeat_interval?).ok()?;
        match self.last_run_time {
            Some(last) => last.checked_add_signed(interval),
            None => Some(self.schedule_time),
        }
    }

    /// Record that a job was created for `run_time`.
    pub fn mark_executed(&mut self, run_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.run_count += 1;
        self.last_run_time = Some(run_time);
        self.updated_at = now;
    }

    /// Record the run at the current schedule time and move the schedule one
    /// interval forward. Returns the new schedule time.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let run_time = self.schedule_time;
        self.mark_executed(run_time, now);
        let next = self.next_run_time().ok_or_else(|| {
            CadenceError::Internal(format!("task {} has no next run time", self.id))
        })?;
        self.schedule_time = next;
        Ok(next)
    }
}
