//! Worker pool that executes dispatched jobs.
//!
//! # Components
//!
//! - [`Worker`]: one execution loop; pops a job, runs it, records the outcome
//!   and queues a retry when attempts remain
//! - [`JobExecutor`]: looks up the handler for a job type and enforces the
//!   job's timeout
//! - [`JobHandler`] / [`HandlerRegistry`]: the per-type execution contract
//!
//! # Execution Flow
//!
//! 1. [`Worker::run`] waits on the dispatch queue (cancellable)
//! 2. The job moves to `RUNNING` with the worker's id and start time
//! 3. [`JobExecutor::execute`] runs the handler in its own task under a timeout
//! 4. The job ends `COMPLETED` or `FAILED`; failures with attempts left
//!    produce a new job in the ready queue after the policy's delay

pub mod executor;
pub mod handler;
pub mod pool;

pub use executor::{ExecutionResult, JobExecutor};
pub use handler::{handler_fn, FnHandler, HandlerRegistry, JobHandler, SimulatedHandler};
pub use pool::Worker;
