use crate::error::{JobError, ToolkitError};
use crate::job::{into_job_result, JobResult};
use crate::stream::ResultStream;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

type SharedJobSource<S> = Arc<AsyncMutex<Pin<Box<S>>>>;

/// A fan-out/fan-in executor that applies a unit of work to a stream of jobs
/// across a fixed number of concurrent workers.
///
/// The pool itself only holds configuration; every call to [`run`] starts a
/// fresh set of workers that live until the job source is exhausted or the
/// run is cancelled.
///
/// [`run`]: WorkerPool::run
#[derive(Debug, Clone)]
pub struct WorkerPool {
  pool_name: Arc<String>,
  worker_count: usize,
  tokio_handle: TokioHandle,
}

impl WorkerPool {
  /// Creates a pool that runs `worker_count` workers on `tokio_handle`.
  ///
  /// # Errors
  /// Returns `ToolkitError::InvalidWorkerCount` if `worker_count` is zero.
  pub fn new(worker_count: usize, tokio_handle: TokioHandle, pool_name: &str) -> Result<Self, ToolkitError> {
    if worker_count == 0 {
      error!(pool_name = %pool_name, "Refusing to create a worker pool without workers.");
      return Err(ToolkitError::InvalidWorkerCount(worker_count));
    }

    Ok(Self {
      pool_name: Arc::new(pool_name.to_string()),
      worker_count,
      tokio_handle,
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// Starts the workers and returns the stream of their results.
  ///
  /// Every job yielded by `jobs` is taken by exactly one worker, which calls
  /// `job_fn` with a cancellation token for the run and the job. Results
  /// arrive in completion order, not submission order.
  ///
  /// Cancelling `scope` stops workers from taking further jobs and discards
  /// results that have not been published yet. A unit of work already in
  /// progress is never interrupted by the pool; it may watch the token it
  /// was handed to stop early.
  pub fn run<K, V, E, S, F, Fut>(&self, scope: CancellationToken, jobs: S, job_fn: F) -> ResultStream<V, E>
  where
    K: Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
    S: Stream<Item = K> + Send + 'static,
    F: Fn(CancellationToken, K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    let run_id = NEXT_POOL_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let run_token = scope.child_token();
    let (result_tx, result_rx) = mpsc::channel::<JobResult<V, E>>(1);
    let job_source: SharedJobSource<S> = Arc::new(AsyncMutex::new(Box::pin(jobs)));
    let job_fn = Arc::new(job_fn);

    info!(pool_name = %self.pool_name, %run_id, workers = self.worker_count, "Starting worker pool run.");

    let mut worker_handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.worker_count);
    for worker_id in 0..self.worker_count {
      let worker_loop = Self::run_worker_loop(
        self.pool_name.clone(),
        worker_id,
        run_token.clone(),
        job_source.clone(),
        job_fn.clone(),
        result_tx.clone(),
      )
      .instrument(info_span!(
        "worker_pool_worker",
        pool_name = %*self.pool_name,
        %run_id,
        %worker_id
      ));
      worker_handles.push(self.tokio_handle.spawn(worker_loop));
    }

    // Only the workers may keep the result channel open.
    drop(result_tx);

    let supervisor_pool_name = self.pool_name.clone();
    self.tokio_handle.spawn(
      async move {
        let mut abnormal_exits = 0usize;
        for join_result in futures::future::join_all(worker_handles).await {
          if let Err(join_error) = join_result {
            abnormal_exits += 1;
            error!(pool_name = %*supervisor_pool_name, %run_id, "Worker task ended abnormally: {:?}", join_error);
          }
        }
        info!(
          pool_name = %*supervisor_pool_name,
          %run_id,
          abnormal_exits,
          "All workers exited. Result stream closed."
        );
      }
      .instrument(info_span!("worker_pool_supervisor", pool_name = %*self.pool_name, %run_id)),
    );

    ResultStream {
      run_id,
      run_token,
      result_rx,
    }
  }

  async fn take_next_job<K, S>(job_source: &SharedJobSource<S>) -> Option<K>
  where
    S: Stream<Item = K> + Send + 'static,
  {
    // Holding the lock across `next` gives each job a single consumer.
    let mut source = job_source.lock().await;
    source.next().await
  }

  async fn run_worker_loop<K, V, E, S, F, Fut>(
    pool_name: Arc<String>,
    worker_id: usize,
    run_token: CancellationToken,
    job_source: SharedJobSource<S>,
    job_fn: Arc<F>,
    result_tx: mpsc::Sender<JobResult<V, E>>,
  ) where
    K: Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
    S: Stream<Item = K> + Send + 'static,
    F: Fn(CancellationToken, K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
  {
    trace!(name = %*pool_name, %worker_id, "Worker started.");
    let mut processed = 0u64;

    loop {
      let next_job = tokio::select! {
        biased;

        _ = run_token.cancelled() => {
          debug!(name = %*pool_name, %worker_id, "Cancellation received while waiting for a job. Worker exiting.");
          break;
        }

        job = Self::take_next_job(&job_source) => job,
      };

      let job = match next_job {
        Some(job) => job,
        None => {
          debug!(name = %*pool_name, %worker_id, "Job source exhausted. Worker exiting.");
          break;
        }
      };

      let unit_of_work = async { (job_fn.as_ref())(run_token.clone(), job).await };
      let outcome: JobResult<V, E> = match AssertUnwindSafe(unit_of_work).catch_unwind().await {
        Ok(result) => into_job_result(result),
        Err(_panic_payload) => {
          error!(name = %*pool_name, %worker_id, "Unit of work panicked during execution.");
          Err(JobError::Panicked)
        }
      };

      tokio::select! {
        biased;

        _ = run_token.cancelled() => {
          debug!(name = %*pool_name, %worker_id, "Cancellation received before the result was published. Dropping result.");
          break;
        }

        send_result = result_tx.send(outcome) => {
          if send_result.is_err() {
            debug!(name = %*pool_name, %worker_id, "Result stream was dropped. Worker exiting.");
            break;
          }
        }
      }

      processed += 1;
      trace!(name = %*pool_name, %worker_id, processed, "Published job result.");
    }

    debug!(name = %*pool_name, %worker_id, processed, "Worker stopped.");
  }
}

/// Runs `job_fn` over `jobs` with `worker_count` workers on the current Tokio
/// runtime and returns the stream of results.
///
/// # Errors
/// Returns `ToolkitError::InvalidWorkerCount` for zero workers and
/// `ToolkitError::RuntimeUnavailable` when called outside a Tokio runtime.
pub fn run_pool<K, V, E, S, F, Fut>(
  scope: CancellationToken,
  worker_count: usize,
  jobs: S,
  job_fn: F,
) -> Result<ResultStream<V, E>, ToolkitError>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + 'static,
  S: Stream<Item = K> + Send + 'static,
  F: Fn(CancellationToken, K) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<V, E>> + Send + 'static,
{
  let tokio_handle = TokioHandle::try_current().map_err(|e| ToolkitError::RuntimeUnavailable(e.to_string()))?;
  let pool = WorkerPool::new(worker_count, tokio_handle, "worker_pool")?;
  Ok(pool.run(scope, jobs, job_fn))
}
