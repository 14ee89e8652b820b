use crate::error::ToolkitError;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc;
use tracing::{debug, info_span, trace, warn, Instrument};

/// A bounded, multi-producer job source for the worker pool.
///
/// Producers apply backpressure once `capacity` jobs are buffered. The
/// consumer half is a `Stream` that ends after the queue is closed and every
/// buffered job has been taken.
#[derive(Debug)]
pub struct JobQueue<K: Send + 'static> {
  tx: mpsc::Sender<K>,
  rx: mpsc::Receiver<K>,
}

impl<K: Send + 'static> JobQueue<K> {
  /// Creates a new `JobQueue` holding at most `capacity` undelivered jobs.
  pub fn new(capacity: usize) -> Result<Self, ToolkitError> {
    if capacity == 0 {
      return Err(ToolkitError::InvalidQueueCapacity(capacity));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok(Self { tx, rx })
  }

  /// Splits the queue into its producer and consumer halves.
  pub fn split(self) -> (JobProducer<K>, JobConsumer<K>) {
    (
      JobProducer {
        slot: Arc::new(Mutex::new(Some(self.tx))),
      },
      JobConsumer { rx: self.rx },
    )
  }

  /// Spawns a producer task that sends every item of `jobs` and then closes
  /// the queue, returning the consumer half.
  ///
  /// The feeder stops early if the consumer is dropped.
  pub fn spawn_feeder<I>(jobs: I, capacity: usize, tokio_handle: TokioHandle) -> Result<JobConsumer<K>, ToolkitError>
  where
    I: IntoIterator<Item = K>,
    I::IntoIter: Send + 'static,
  {
    let (producer, consumer) = Self::new(capacity)?.split();
    let jobs = jobs.into_iter();

    tokio_handle.spawn(
      async move {
        let mut sent = 0usize;
        for job in jobs {
          if producer.send(job).await.is_err() {
            debug!(sent, "Job consumer went away. Feeder stopping early.");
            return;
          }
          sent += 1;
        }
        producer.close();
        trace!(sent, "Feeder delivered all jobs and closed the queue.");
      }
      .instrument(info_span!("job_queue_feeder")),
    );

    Ok(consumer)
  }
}

/// The producer handle for a `JobQueue`. It can be cloned and shared across
/// multiple submission sites; closing it through any clone closes the queue
/// for all of them.
#[derive(Clone)]
pub struct JobProducer<K: Send + 'static> {
  slot: Arc<Mutex<Option<mpsc::Sender<K>>>>,
}

impl<K: Send + 'static> fmt::Debug for JobProducer<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobProducer")
      .field("closed", &self.is_closed())
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}

impl<K: Send + 'static> JobProducer<K> {
  /// Sends a job into the queue, waiting while the queue is full.
  ///
  /// # Errors
  /// Returns `ToolkitError::JobQueueClosed` if the queue was closed by any
  /// producer, or if the consumer half has been dropped (for example after
  /// the pool consuming it was cancelled).
  pub async fn send(&self, job: K) -> Result<(), ToolkitError> {
    // Clone the sender out so the lock is not held across the await.
    let tx = match self.slot.lock().as_ref() {
      Some(tx) => tx.clone(),
      None => {
        warn!("Attempted to send a job into a closed job queue.");
        return Err(ToolkitError::JobQueueClosed);
      }
    };

    tx.send(job).await.map_err(|_| {
      debug!("Job consumer dropped before the job could be delivered.");
      ToolkitError::JobQueueClosed
    })
  }

  /// Closes the queue. Jobs already buffered are still delivered; the
  /// consumer then observes end-of-stream. Closing twice is a no-op.
  pub fn close(&self) {
    if self.slot.lock().take().is_some() {
      debug!("Job queue closed by producer.");
    } else {
      trace!("Job queue already closed.");
    }
  }

  /// Returns `true` if the queue was closed or its consumer was dropped.
  pub fn is_closed(&self) -> bool {
    match self.slot.lock().as_ref() {
      Some(tx) => tx.is_closed(),
      None => true,
    }
  }

  /// Returns the number of jobs buffered and not yet taken by the consumer.
  pub fn len(&self) -> usize {
    match self.slot.lock().as_ref() {
      Some(tx) => tx.max_capacity() - tx.capacity(),
      None => 0,
    }
  }

  /// Returns `true` if no jobs are waiting in the queue.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// The consumer handle for a `JobQueue`. It cannot be cloned; the worker
/// pool shares it between its workers behind a lock so every job is taken
/// exactly once.
#[derive(Debug)]
pub struct JobConsumer<K: Send + 'static> {
  rx: mpsc::Receiver<K>,
}

impl<K: Send + 'static> JobConsumer<K> {
  /// Receives the next job, or `None` once the queue is closed and drained.
  pub async fn recv(&mut self) -> Option<K> {
    self.rx.recv().await
  }
}

impl<K: Send + 'static> Stream for JobConsumer<K> {
  type Item = K;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<K>> {
    self.rx.poll_recv(cx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_queue_send_recv() {
    let (producer, mut consumer) = JobQueue::<u64>::new(5).unwrap().split();

    assert!(producer.is_empty());
    producer.send(1).await.unwrap();
    assert_eq!(producer.len(), 1);

    assert_eq!(consumer.recv().await, Some(1));
    assert!(producer.is_empty());
  }

  #[tokio::test]
  async fn test_zero_capacity_is_rejected() {
    let result = JobQueue::<u64>::new(0);
    assert!(matches!(result, Err(ToolkitError::InvalidQueueCapacity(0))));
  }

  #[tokio::test]
  async fn test_queue_capacity_blocks_send() {
    let (producer, mut consumer) = JobQueue::<u64>::new(1).unwrap().split();

    producer.send(1).await.unwrap();
    assert_eq!(producer.len(), 1);

    let send_future = producer.send(2);
    tokio::pin!(send_future);

    tokio::select! {
        _ = &mut send_future => {
            panic!("Send should have blocked because the queue is full.");
        },
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    assert_eq!(consumer.recv().await, Some(1));

    tokio::time::timeout(Duration::from_millis(50), send_future)
      .await
      .expect("Send did not complete after queue was drained.")
      .unwrap();
    assert_eq!(consumer.recv().await, Some(2));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_queue_concurrent_sends() {
    let (producer, mut consumer) = JobQueue::<u64>::new(4).unwrap().split();
    let num_jobs: u64 = 20;
    let received_count = Arc::new(AtomicUsize::new(0));

    let producer_handle = {
      let producer = producer.clone();
      tokio::spawn(async move {
        let mut handles = Vec::new();
        for i in 0..num_jobs {
          let p = producer.clone();
          handles.push(tokio::spawn(async move {
            p.send(i).await.unwrap();
          }));
        }
        for handle in handles {
          handle.await.unwrap();
        }
        producer.close();
      })
    };

    let consumer_handle = {
      let received_count = received_count.clone();
      tokio::spawn(async move {
        while consumer.recv().await.is_some() {
          received_count.fetch_add(1, Ordering::SeqCst);
        }
      })
    };

    producer_handle.await.unwrap();
    consumer_handle.await.unwrap();

    assert_eq!(received_count.load(Ordering::SeqCst), num_jobs as usize);
  }

  #[tokio::test]
  async fn test_close_drains_then_ends_stream() {
    let (producer, consumer) = JobQueue::<u64>::new(2).unwrap().split();

    producer.send(1).await.unwrap();
    producer.send(2).await.unwrap();
    producer.close();
    assert!(producer.is_closed());

    let received: Vec<u64> = consumer.collect().await;
    assert_eq!(received, vec![1, 2]);
  }

  #[tokio::test]
  async fn test_send_after_close_fails_for_every_clone() {
    let (producer, _consumer) = JobQueue::<u64>::new(2).unwrap().split();
    let other = producer.clone();

    producer.close();
    producer.close();

    assert_eq!(producer.send(1).await, Err(ToolkitError::JobQueueClosed));
    assert_eq!(other.send(2).await, Err(ToolkitError::JobQueueClosed));
  }

  #[tokio::test]
  async fn test_send_fails_when_consumer_dropped() {
    let (producer, consumer) = JobQueue::<u64>::new(2).unwrap().split();
    drop(consumer);

    assert!(producer.is_closed());
    assert_eq!(producer.send(1).await, Err(ToolkitError::JobQueueClosed));
  }

  #[tokio::test]
  async fn test_spawn_feeder_delivers_everything() {
    let consumer = JobQueue::spawn_feeder(0..10u64, 3, TokioHandle::current()).unwrap();
    let received: Vec<u64> = consumer.collect().await;
    assert_eq!(received, (0..10).collect::<Vec<_>>());
  }
}
