use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{CadenceError, Result};
use crate::scheduler::job::Job;

/// Bounded FIFO between the scheduler and the workers.
///
/// Backed by a tokio mpsc channel. The single receiver sits behind a mutex so
/// any number of workers can pop; whichever worker holds the lock when a job
/// arrives receives it, and no other worker ever sees that job.
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue a job, waiting while the queue is full.
    pub async fn push(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| CadenceError::QueueClosed)
    }

    /// Enqueue without waiting. Fails with `QueueFull` at capacity.
    pub fn try_push(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CadenceError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CadenceError::QueueClosed,
        })
    }

    /// Wait for the next job. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Job> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = async { self.rx.lock().await.recv().await } => job,
        }
    }

    /// Drop every job still waiting in the queue and return how many there were.
    pub async fn discard_pending(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Jobs currently buffered. Advisory only.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
