use std::time::Duration;

use crate::error::{CadenceError, Result};

/// Delays applied before a failed job is retried.
///
/// `FixedDelay` tasks wait `fixed_delay_ms` (zero means the retry is queued
/// immediately). `ExponentialBackoff` tasks wait
/// `backoff_base_ms * 2^(attempt - 1)`, capped at `backoff_max_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub fixed_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fixed_delay_ms: 0,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn fixed_delay(&self) -> Duration {
        Duration::from_millis(self.fixed_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Number of concurrent worker loops
    pub worker_count: usize,
    /// Scheduler tick interval; bounds both due-task latency and stop latency
    pub tick_interval_ms: u64,
    /// Capacity of the dispatch queue. A full queue makes the scheduler wait.
    pub dispatch_capacity: usize,
    /// Buffered events per subscriber before slow subscribers start lagging
    pub event_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            tick_interval_ms: 1_000,
            dispatch_capacity: 1_024,
            event_capacity: 1_024,
            retry: RetryConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    pub fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    pub fn with_dispatch_capacity(mut self, dispatch_capacity: usize) -> Self {
        self.dispatch_capacity = dispatch_capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(CadenceError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(CadenceError::InvalidConfig(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.dispatch_capacity == 0 {
            return Err(CadenceError::InvalidConfig(
                "dispatch_capacity must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(CadenceError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(CadenceError::InvalidConfig(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }
        Ok(())
    }
}
