use std::sync::Arc;
use std::time::{Duration, Instant};

use task_orchestra::{AtomicCounter, CancellationToken, Counter, RateLimiter, SharedLruCache, ToolkitError, WorkerPool};
use tokio::runtime::Handle;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Rate Limited Pool Example ---");

  let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100), Handle::current()).expect("non-zero interval"));
  let cache = SharedLruCache::<u64, String>::new(4);
  let lookups = Arc::new(AtomicCounter::new());
  let pool = WorkerPool::new(3, Handle::current(), "rate_limited_pool").expect("three workers is a valid pool");
  let scope = CancellationToken::new();
  let started = Instant::now();

  let job_limiter = limiter.clone();
  let job_cache = cache.clone();
  let job_lookups = lookups.clone();
  let keys = [1u64, 2, 3, 1, 2, 5, 6, 1, 7, 8];

  let mut results = pool.run(scope.clone(), futures::stream::iter(keys), move |_token, key: u64| {
    let limiter = job_limiter.clone();
    let cache = job_cache.clone();
    let lookups = job_lookups.clone();
    async move {
      if let Some(hit) = cache.get(&key) {
        return Ok::<String, ToolkitError>(format!("{} (cached)", hit));
      }
      // Only cache misses pay for an admission token.
      limiter.allow().await?;
      lookups.inc();
      let value = format!("record-{}", key);
      cache.put(key, value.clone());
      Ok(value)
    }
  });

  while let Some(result) = results.recv().await {
    match result {
      Ok(value) => info!(elapsed_ms = started.elapsed().as_millis() as u64, "Resolved {}", value),
      Err(e) => warn!("Lookup failed: {}", e),
    }
  }

  limiter.shutdown().await;
  info!("Performed {} rate limited lookups.", lookups.value());
  info!("--- Rate Limited Pool Example End ---");
}
