use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CadenceError, Result};
use crate::task::Task;

/// Keyed task storage consulted by the scheduler on every tick.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Register a task. Fails with `TaskExists` on a duplicate id.
    async fn add(&self, task: Task) -> Result<()>;

    async fn get(&self, id: &Uuid) -> Result<Option<Task>>;

    /// Remove a task, returning it if it was present.
    async fn remove(&self, id: &Uuid) -> Result<Option<Task>>;

    /// Replace a stored task. Fails with `TaskNotFound` if it is gone.
    async fn update(&self, task: Task) -> Result<()>;

    /// Tasks with `schedule_time <= now`, earliest first.
    async fn list_ready(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    async fn list(&self) -> Result<Vec<Task>>;

    /// Number of registered tasks.
    async fn len(&self) -> Result<usize>;
}

/// Task store backed by a `HashMap`. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

fn sort_by_schedule(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.schedule_time
            .cmp(&b.schedule_time)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn add(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(CadenceError::TaskExists(task.id));
        }
        tracing::debug!(task_id = %task.id, name = %task.name, "Task registered");
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn remove(&self, id: &Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.write().await.remove(id))
    }

    async fn update(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                Ok(())
            }
            None => Err(CadenceError::TaskNotFound(task.id)),
        }
    }

    async fn list_ready(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut ready: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        sort_by_schedule(&mut ready);
        Ok(ready)
    }

    async fn list(&self) -> Result<Vec<Task>> {
        let mut all: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        sort_by_schedule(&mut all);
        Ok(all)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.tasks.read().await.len())
    }
}
