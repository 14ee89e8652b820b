use crate::error::JobError;

use std::future::Future;
use std::pin::Pin;

/// The outcome the pool publishes for every job it processes.
pub type JobResult<V, E> = Result<V, JobError<E>>;

/// A boxed unit of work, handy when the caller's closure needs to return
/// differently-typed futures from separate branches.
pub type BoxedJobFuture<V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send + 'static>>;

/// Wraps a plain `Result` from the unit of work into the pool's result type.
pub(crate) fn into_job_result<V, E>(outcome: Result<V, E>) -> JobResult<V, E> {
  outcome.map_err(JobError::Failed)
}
