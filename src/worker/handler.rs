use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::scheduler::Job;

/// Executes jobs of one type. `Err` carries the failure reason.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<(), String>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a handler. The closure receives an owned copy of the job.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn execute(&self, job: &Job) -> Result<(), String> {
        (self.0)(job.clone()).await
    }
}

/// Stand-in handler that sleeps for a fixed time and succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    duration: Duration,
}

impl SimulatedHandler {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl JobHandler for SimulatedHandler {
    async fn execute(&self, job: &Job) -> Result<(), String> {
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, duration_ms = self.duration.as_millis() as u64, "Simulating job");
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Handlers keyed by job type, with an optional fallback for unknown types.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    fallback: Option<Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        self.handlers.insert(job_type.into(), Arc::new(handler));
    }

    pub fn with_handler(
        mut self,
        job_type: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> Self {
        self.register(job_type, handler);
        self
    }

    pub fn with_fallback(mut self, handler: impl JobHandler + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .get(job_type)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
