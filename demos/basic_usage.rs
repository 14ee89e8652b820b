use std::time::Duration;

use task_orchestra::{CancellationToken, JobQueue, WorkerPool};
use tokio::runtime::Handle;
use tracing::info;

async fn square(id: u64, delay_ms: u64) -> Result<u64, String> {
  info!("Job {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id == 7 {
    return Err(format!("Job {} refuses to be squared", id));
  }
  Ok(id * id)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = WorkerPool::new(4, Handle::current(), "basic_pool").expect("four workers is a valid pool");
  let (producer, consumer) = JobQueue::<u64>::new(2).expect("non-zero queue capacity").split();

  tokio::spawn(async move {
    for i in 0..10 {
      if let Err(e) = producer.send(i).await {
        tracing::error!("Failed to submit job {}: {}", i, e);
        return;
      }
    }
    producer.close();
    info!("All jobs submitted.");
  });

  let mut results = pool.run(CancellationToken::new(), consumer, |_token, id: u64| {
    // Alternate sleep times for variety
    let delay_ms = 100 + (id % 3 * 50);
    square(id, delay_ms)
  });

  while let Some(result) = results.recv().await {
    match result {
      Ok(value) => info!("Result: {}", value),
      Err(e) => info!("Job error: {}", e),
    }
  }

  info!("Result stream closed; all workers exited.");
  info!("--- Basic Usage Example End ---");
}
