use std::time::Duration;

use thiserror::Error;

/// Errors that can occur within the `task_orchestra` toolkit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolkitError {
  #[error("Worker pool requires at least one worker, got {0}")]
  InvalidWorkerCount(usize),

  #[error("Job queue requires a capacity of at least one, got {0}")]
  InvalidQueueCapacity(usize),

  #[error("Rate limiter interval must be non-zero, got {0:?}")]
  InvalidInterval(Duration),

  #[error("No Tokio runtime available to spawn onto: {0}")]
  RuntimeUnavailable(String),

  #[error("Job queue was closed, cannot accept new jobs")]
  JobQueueClosed,

  #[error("Rate limiter was closed, no further tokens will be issued")]
  LimiterClosed,
}

/// The failure half of a job result delivered by the worker pool.
///
/// A failing job never stops the pool; its error is handed back to the
/// caller in place of a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError<E> {
  /// The unit of work returned an error for this job.
  #[error("Job failed: {0}")]
  Failed(E),

  /// The unit of work panicked while processing this job.
  #[error("Job panicked during execution")]
  Panicked,
}

impl<E> JobError<E> {
  /// Returns the user error, if the job failed rather than panicked.
  pub fn into_failure(self) -> Option<E> {
    match self {
      JobError::Failed(e) => Some(e),
      JobError::Panicked => None,
    }
  }
}
