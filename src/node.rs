use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::error::{CadenceError, Result};
use crate::events::{EventBus, SchedulerEvent};
use crate::scheduler::{DispatchQueue, ReadyQueue, Scheduler};
use crate::task::{InMemoryTaskStore, Task, TaskOptions, TaskStore};
use crate::worker::{HandlerRegistry, JobExecutor, Worker};

/// Loops spawned by one `start()`.
struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the queues and the task store and runs the scheduler and worker
/// loops on the tokio runtime.
pub struct Node {
    config: NodeConfig,
    tasks: Arc<dyn TaskStore>,
    ready: Arc<Mutex<ReadyQueue>>,
    dispatch: DispatchQueue,
    executor: JobExecutor,
    events: EventBus,
    running: Mutex<Option<Running>>,
}

impl Node {
    /// Node with an in-memory task store.
    pub fn new(config: NodeConfig, handlers: HandlerRegistry) -> Result<Self> {
        Self::with_store(config, handlers, Arc::new(InMemoryTaskStore::new()))
    }

    pub fn with_store(
        config: NodeConfig,
        handlers: HandlerRegistry,
        tasks: Arc<dyn TaskStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            dispatch: DispatchQueue::new(config.dispatch_capacity),
            events: EventBus::new(config.event_capacity),
            executor: JobExecutor::new(handlers),
            ready: Arc::new(Mutex::new(ReadyQueue::new())),
            tasks,
            config,
            running: Mutex::new(None),
        })
    }

    /// Spawn the scheduler loop and `worker_count` worker loops.
    ///
    /// Calling `start` on a running node does nothing.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("Node already running");
            return;
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.config.worker_count + 1);

        let scheduler = Scheduler::new(
            self.tasks.clone(),
            self.ready.clone(),
            self.dispatch.clone(),
            self.events.clone(),
            self.config.tick_interval(),
            cancel.clone(),
        );
        handles.push(tokio::spawn(scheduler.run()));

        for worker_id in 0..self.config.worker_count {
            let worker = Worker::new(
                worker_id,
                self.dispatch.clone(),
                self.ready.clone(),
                self.executor.clone(),
                self.events.clone(),
                self.config.retry.clone(),
                cancel.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        tracing::info!(
            workers = self.config.worker_count,
            tick_ms = self.config.tick_interval_ms,
            "Node started"
        );
        *running = Some(Running { cancel, handles });
    }

    /// Signal every loop to stop and wait for them to exit.
    ///
    /// Jobs executing at that moment finish first. Jobs still waiting in the
    /// dispatch queue are discarded and their count is returned; jobs in the
    /// ready queue are kept for a later `start`. Calling `stop` on a stopped
    /// node returns 0.
    pub async fn stop(&self) -> usize {
        let Some(running) = self.running.lock().await.take() else {
            return 0;
        };

        tracing::info!("Stopping node");
        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Loop exited abnormally");
            }
        }

        let discarded = self.dispatch.discard_pending().await;
        if discarded > 0 {
            self.events.emit(SchedulerEvent::JobsDiscarded {
                count: discarded,
                at: Utc::now(),
            });
        }
        tracing::info!(discarded, "Node stopped");
        discarded
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Register a task to run at `run_time` and return its id.
    pub async fn submit_task(
        &self,
        name: impl Into<String>,
        job_type: impl Into<String>,
        run_time: DateTime<Utc>,
        options: TaskOptions,
    ) -> Result<Uuid> {
        let task = Task::new(name, job_type, run_time, options)?;
        let id = task.id;
        tracing::info!(
            task_id = %id,
            name = %task.name,
            job_type = %task.job_type,
            run_time = %task.schedule_time,
            recurring = task.is_recurring(),
            "Task submitted"
        );
        self.tasks.add(task).await?;
        Ok(id)
    }

    /// Remove a task so it produces no further jobs. Jobs it already
    /// produced are unaffected.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<Task> {
        let task = self
            .tasks
            .remove(&task_id)
            .await?
            .ok_or(CadenceError::TaskNotFound(task_id))?;
        tracing::info!(task_id = %task_id, name = %task.name, "Task cancelled");
        Ok(task)
    }

    pub async fn task(&self, task_id: Uuid) -> Result<Option<Task>> {
        self.tasks.get(&task_id).await
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.tasks.list().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Jobs waiting for their run time.
    pub async fn ready_len(&self) -> usize {
        self.ready.lock().await.len()
    }

    /// Jobs waiting for a worker. Advisory only.
    pub fn dispatch_len(&self) -> usize {
        self.dispatch.len()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
