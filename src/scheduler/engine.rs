use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{CadenceError, Result};
use crate::events::{EventBus, SchedulerEvent};
use crate::scheduler::dispatch::DispatchQueue;
use crate::scheduler::job::Job;
use crate::scheduler::queue::ReadyQueue;
use crate::task::{Task, TaskStore};

/// What a single tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub created: usize,
    pub promoted: usize,
    pub errors: usize,
}

/// The scheduling loop: turns due tasks into jobs and promotes due jobs
/// from the ready queue to the dispatch queue.
pub struct Scheduler {
    tasks: Arc<dyn TaskStore>,
    ready: Arc<Mutex<ReadyQueue>>,
    dispatch: DispatchQueue,
    events: EventBus,
    tick_interval: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        ready: Arc<Mutex<ReadyQueue>>,
        dispatch: DispatchQueue,
        events: EventBus,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tasks,
            ready,
            dispatch,
            events,
            tick_interval,
            cancel,
        }
    }

    /// Run ticks until cancelled.
    ///
    /// A failing or panicking tick is reported and the loop carries on with
    /// the next one. Stop latency is bounded by one tick interval.
    pub async fn run(self) {
        tracing::info!(tick_ms = self.tick_interval.as_millis() as u64, "Scheduler started");
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        let this = Arc::new(self);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => this.clone().run_tick(Utc::now()).await,
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// One tick in its own tokio task, so a panic in a collaborator is
    /// contained to that tick.
    async fn run_tick(self: Arc<Self>, now: DateTime<Utc>) {
        let scheduler = self.clone();
        let outcome = tokio::spawn(async move { scheduler.tick(now).await }).await;

        match outcome {
            Ok(Ok(report)) if report != TickReport::default() => {
                tracing::debug!(
                    created = report.created,
                    promoted = report.promoted,
                    errors = report.errors,
                    "Scheduler tick"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => self.report_error(None, None, &e),
            Err(e) if e.is_panic() => {
                let e = CadenceError::Internal("scheduler tick panicked".to_string());
                self.report_error(None, None, &e);
            }
            Err(e) => {
                self.report_error(
                    None,
                    None,
                    &CadenceError::Internal(format!("scheduler tick ended unexpectedly: {}", e)),
                );
            }
        }
    }

    /// One scheduling pass at time `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = self.create_jobs(now).await?;
        report.promoted = self.promote_due(now).await?;
        Ok(report)
    }

    /// Create a job for every task due at `now`.
    ///
    /// Errors are isolated per task: the failing task stays in the store
    /// unchanged and is picked up again on the next tick.
    async fn create_jobs(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for task in self.tasks.list_ready(now).await? {
            let task_id = task.id;
            match self.materialize(task, now).await {
                Ok(true) => report.created += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    self.report_error(Some(task_id), None, &e);
                }
            }
        }
        Ok(report)
    }

    /// Re-arm or remove the task in the store, then queue its job. The job
    /// is only queued once the store write has succeeded, so a failure
    /// leaves the task due again rather than losing the run.
    async fn materialize(&self, mut task: Task, now: DateTime<Utc>) -> Result<bool> {
        let job = Job::for_task(&task, now);

        if task.is_recurring() {
            let next = task.advance(now)?;
            match self.tasks.update(task).await {
                Ok(()) => {
                    tracing::debug!(task_id = %job.task_id, next_run = %next, "Recurring task re-armed");
                }
                Err(CadenceError::TaskNotFound(id)) => {
                    tracing::debug!(task_id = %id, "Task cancelled before its job was created");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        } else if self.tasks.remove(&task.id).await?.is_none() {
            tracing::debug!(task_id = %task.id, "Task cancelled before its job was created");
            return Ok(false);
        }

        self.events.emit(SchedulerEvent::job_created(&job, now));
        self.ready.lock().await.add(job);
        Ok(true)
    }

    /// Move due jobs to the dispatch queue, most urgent first.
    ///
    /// Each job is popped under the ready-queue lock and pushed after the
    /// lock is released, so a full dispatch queue never blocks producers of
    /// the ready queue.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut promoted = 0;
        loop {
            let job = self.ready.lock().await.pop_if_due(now);
            let Some(job) = job else {
                break;
            };

            let event = SchedulerEvent::job_promoted(&job, now);
            tokio::select! {
                biased;
                pushed = self.dispatch.push(job.clone()) => pushed?,
                _ = self.cancel.cancelled() => {
                    // Stopping while the dispatch queue is full: keep the job
                    self.ready.lock().await.add(job);
                    break;
                }
            }
            self.events.emit(event);
            promoted += 1;
        }
        Ok(promoted)
    }

    fn report_error(&self, task_id: Option<Uuid>, job_id: Option<Uuid>, e: &CadenceError) {
        self.events.emit(SchedulerEvent::SchedulerError {
            task_id,
            job_id,
            error: e.to_string(),
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{InMemoryTaskStore, TaskOptions};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryTaskStore>,
        ready: Arc<Mutex<ReadyQueue>>,
        dispatch: DispatchQueue,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let ready = Arc::new(Mutex::new(ReadyQueue::new()));
        let dispatch = DispatchQueue::new(64);
        let scheduler = Scheduler::new(
            store.clone(),
            ready.clone(),
            dispatch.clone(),
            EventBus::new(64),
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        Fixture {
            store,
            ready,
            dispatch,
            scheduler,
        }
    }

    #[tokio::test]
    async fn nothing_due_does_nothing() {
        let f = fixture();
        let task = Task::new("later", "email", at(100), TaskOptions::default()).unwrap();
        f.store.add(task).await.unwrap();

        let report = f.scheduler.tick(at(0)).await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(f.store.len().await.unwrap(), 1);
        assert!(f.dispatch.is_empty());
    }

    #[tokio::test]
    async fn one_shot_task_is_promoted_and_removed() {
        let f = fixture();
        let task = Task::new("once", "email", at(5), TaskOptions::default()).unwrap();
        let task_id = task.id;
        f.store.add(task).await.unwrap();

        let report = f.scheduler.tick(at(5)).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.promoted, 1);
        assert!(f.store.get(&task_id).await.unwrap().is_none());
        assert!(f.ready.lock().await.is_empty());

        let job = f.dispatch.pop(&CancellationToken::new()).await.unwrap();
        assert_eq!(job.task_id, task_id);
        assert_eq!(job.run_time, at(5));

        let report = f.scheduler.tick(at(6)).await.unwrap();
        assert_eq!(report.created, 0);
    }

    #[tokio::test]
    async fn recurring_task_stays_registered() {
        let f = fixture();
        let opts = TaskOptions::default().with_repeat_interval(Duration::from_secs(10));
        let task = Task::new("every10", "report", at(0), opts).unwrap();
        let task_id = task.id;
        f.store.add(task).await.unwrap();

        f.scheduler.tick(at(0)).await.unwrap();
        let stored = f.store.get(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.schedule_time, at(10));
        assert_eq!(stored.run_count, 1);

        // Not due again until the interval has passed
        assert_eq!(f.scheduler.tick(at(9)).await.unwrap().created, 0);
        assert_eq!(f.scheduler.tick(at(10)).await.unwrap().created, 1);
    }

    #[tokio::test]
    async fn promotion_follows_priority_order() {
        let f = fixture();
        for (name, priority) in [("p5", 5), ("p1", 1), ("p3", 3)] {
            let opts = TaskOptions::default().with_priority(priority);
            f.store
                .add(Task::new(name, "email", at(0), opts).unwrap())
                .await
                .unwrap();
        }

        f.scheduler.tick(at(0)).await.unwrap();
        let cancel = CancellationToken::new();
        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(f.dispatch.pop(&cancel).await.unwrap().task_name);
        }
        assert_eq!(names, vec!["p1", "p3", "p5"]);
    }

    #[tokio::test]
    async fn future_jobs_wait_in_ready_queue() {
        let f = fixture();
        let task = Task::new("x", "email", at(50), TaskOptions::default()).unwrap();
        f.ready.lock().await.add(Job::for_task(&task, at(0)));

        assert_eq!(f.scheduler.tick(at(10)).await.unwrap().promoted, 0);
        assert_eq!(f.ready.lock().await.len(), 1);
        assert_eq!(f.scheduler.tick(at(50)).await.unwrap().promoted, 1);
        assert_eq!(f.dispatch.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_task_produces_no_job() {
        let f = fixture();
        let task = Task::new("gone", "email", at(0), TaskOptions::default()).unwrap();
        // Never added to the store: the removal finds nothing
        let created = f.scheduler.materialize(task, at(0)).await.unwrap();
        assert!(!created);
        assert!(f.ready.lock().await.is_empty());
    }
}
