use crate::job::JobId;

use thiserror::Error;

/// Errors that can occur while building the engine via `EngineBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Fast pool worker count must be greater than zero")]
  ZeroFastWorkers,
  #[error("Pre-read window must be at least one second")]
  WindowTooSmall,
}

/// Errors surfaced by `JobStore` implementations.
///
/// `Backend` wraps whatever the underlying store (database, KV, ...) reports;
/// the scheduler treats it as transient and retries on the next cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("Job {0} not found")]
  NotFound(JobId),
  #[error("Store backend error: {0}")]
  Backend(String),
}

/// Errors surfaced by the distributed lock adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
  #[error("Lock backend error: {0}")]
  Backend(String),
}

/// Errors related to submitting a trigger to the dispatcher.
///
/// `QueueFull` is the fail-fast backpressure signal: the submission was
/// rejected synchronously and a `Discarded` trigger record was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error("{pool} trigger pool queue is full, job {job_id} discarded")]
  QueueFull { pool: &'static str, job_id: JobId },
  #[error("Dispatcher is shut down, job {0} rejected")]
  Closed(JobId),
}

/// Errors from the handler registry and handler execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
  #[error("No handler bound for job {0}")]
  NotBound(JobId),
  #[error("Script compile failed: {0}")]
  Compile(String),
  #[error("Handler execution failed: {0}")]
  Execution(String),
  #[error("Handler init failed: {0}")]
  Init(String),
  #[error("Registration version {offered} is not newer than bound version {current}")]
  StaleVersion { current: i64, offered: i64 },
}

/// Errors related to the engine shutdown procedure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Failed to send shutdown signal (engine already shut down).")]
  SignalFailed,
  #[error("Timed out waiting for scheduler tasks to complete shutdown.")]
  Timeout,
  #[error("A scheduler task panicked during the shutdown process.")]
  TaskPanic,
}
