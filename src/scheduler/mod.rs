//! The scheduling pipeline.
//!
//! - [`Job`]: one execution attempt of a task and its status machine
//! - [`ReadyQueue`]: jobs waiting for their run time, by `(priority, run_time)`
//! - [`DispatchQueue`]: bounded multi-consumer FIFO feeding the workers
//! - [`Scheduler`]: the tick loop that creates and promotes jobs

pub mod dispatch;
pub mod engine;
pub mod job;
pub mod queue;

pub use dispatch::DispatchQueue;
pub use engine::{Scheduler, TickReport};
pub use job::{Job, JobStatus};
pub use queue::ReadyQueue;
