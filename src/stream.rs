use crate::job::JobResult;

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The unordered stream of job results produced by one `WorkerPool::run`.
///
/// The stream ends (yields `None`) once every worker of the run has exited,
/// which happens after the job source is exhausted or the run is cancelled.
/// Dropping the stream cancels the run.
pub struct ResultStream<V: Send + 'static, E: Send + 'static> {
  pub(crate) run_id: u64,
  pub(crate) run_token: CancellationToken,
  pub(crate) result_rx: mpsc::Receiver<JobResult<V, E>>,
}

impl<V: Send + 'static, E: Send + 'static> fmt::Debug for ResultStream<V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultStream")
      .field("run_id", &self.run_id)
      .field("cancelled", &self.run_token.is_cancelled())
      .finish_non_exhaustive()
  }
}

impl<V: Send + 'static, E: Send + 'static> ResultStream<V, E> {
  /// Returns the process-unique id of the run feeding this stream.
  pub fn run_id(&self) -> u64 {
    self.run_id
  }

  /// Checks if cancellation has been requested for this run, either through
  /// `cancel` or through the scope the run was started with.
  pub fn is_cancellation_requested(&self) -> bool {
    self.run_token.is_cancelled()
  }

  /// Cancels this run only. The caller's scope is left untouched.
  pub fn cancel(&self) {
    debug!(run_id = %self.run_id, "ResultStream: Cancellation requested.");
    self.run_token.cancel();
  }

  /// Receives the next job result, or `None` once all workers have exited.
  pub async fn recv(&mut self) -> Option<JobResult<V, E>> {
    self.result_rx.recv().await
  }

  /// Drains the stream to completion and returns every result in arrival
  /// order.
  pub async fn collect_all(mut self) -> Vec<JobResult<V, E>> {
    let mut results = Vec::new();
    while let Some(result) = self.result_rx.recv().await {
      results.push(result);
    }
    results
  }
}

impl<V: Send + 'static, E: Send + 'static> Stream for ResultStream<V, E> {
  type Item = JobResult<V, E>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.result_rx.poll_recv(cx)
  }
}

impl<V: Send + 'static, E: Send + 'static> Drop for ResultStream<V, E> {
  fn drop(&mut self) {
    // Workers may be parked on a job source that never ends; release them.
    if !self.run_token.is_cancelled() {
      debug!(run_id = %self.run_id, "ResultStream dropped. Cancelling run.");
      self.run_token.cancel();
    }
  }
}
