use task_orchestra::{RateLimiter, ToolkitError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle as TokioHandle;
use tokio::time::{sleep, timeout};

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,task_orchestra=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[tokio::test]
async fn test_first_allow_never_waits() {
  setup_tracing_for_test();
  let limiter = RateLimiter::new(Duration::from_secs(10), TokioHandle::current()).unwrap();

  timeout(Duration::from_millis(20), limiter.allow())
    .await
    .expect("seeded token should be available immediately")
    .unwrap();

  limiter.shutdown().await;
}

#[tokio::test]
async fn test_second_allow_waits_for_refill() {
  setup_tracing_for_test();
  let interval = Duration::from_millis(100);
  let limiter = RateLimiter::new(interval, TokioHandle::current()).unwrap();

  limiter.allow().await.unwrap();
  let started = Instant::now();
  limiter.allow().await.unwrap();
  assert!(
    started.elapsed() >= Duration::from_millis(80),
    "second token arrived after {:?}",
    started.elapsed()
  );

  limiter.shutdown().await;
}

#[tokio::test]
async fn test_idle_ticks_do_not_accumulate_tokens() {
  setup_tracing_for_test();
  let limiter = RateLimiter::new(Duration::from_millis(50), TokioHandle::current()).unwrap();

  // Several ticks elapse with the slot already full.
  sleep(Duration::from_millis(125)).await;

  assert_eq!(limiter.try_allow(), Ok(true));
  assert_eq!(limiter.try_allow(), Ok(false));

  limiter.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admissions_bounded_by_elapsed_intervals() {
  setup_tracing_for_test();
  let interval = Duration::from_millis(40);
  let span = Duration::from_millis(300);
  let span_started = Instant::now();
  let limiter = Arc::new(RateLimiter::new(interval, TokioHandle::current()).unwrap());

  // Several concurrent callers compete for tokens.
  let mut callers = Vec::new();
  for _ in 0..4 {
    let limiter = limiter.clone();
    callers.push(tokio::spawn(async move {
      let mut admitted = 0u32;
      while timeout(span.saturating_sub(span_started.elapsed()), limiter.allow()).await.is_ok() {
        if span_started.elapsed() > span {
          break;
        }
        admitted += 1;
      }
      admitted
    }));
  }

  let mut total = 0u32;
  for caller in callers {
    total += caller.await.unwrap();
  }

  let bound = 1 + (span.as_millis() / interval.as_millis()) as u32;
  assert!(total <= bound, "admitted {total}, bound {bound}");
  assert!(total >= 2, "limiter admitted almost nothing: {total}");

  limiter.shutdown().await;
}

#[tokio::test]
async fn test_allow_after_close_fails() {
  setup_tracing_for_test();
  let limiter = RateLimiter::new(Duration::from_millis(10), TokioHandle::current()).unwrap();

  limiter.close();
  assert!(limiter.is_closed());

  assert_eq!(limiter.allow().await, Err(ToolkitError::LimiterClosed));
  assert_eq!(limiter.try_allow(), Err(ToolkitError::LimiterClosed));
}

#[tokio::test]
async fn test_close_is_idempotent() {
  setup_tracing_for_test();
  let limiter = RateLimiter::new(Duration::from_millis(10), TokioHandle::current()).unwrap();

  limiter.close();
  limiter.close();
  limiter.shutdown().await;
  limiter.shutdown().await;

  assert_eq!(limiter.allow().await, Err(ToolkitError::LimiterClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_wakes_blocked_caller() {
  setup_tracing_for_test();
  let limiter = Arc::new(RateLimiter::new(Duration::from_secs(10), TokioHandle::current()).unwrap());
  limiter.allow().await.unwrap();

  let waiter = {
    let limiter = limiter.clone();
    tokio::spawn(async move { limiter.allow().await })
  };

  sleep(Duration::from_millis(50)).await;
  assert!(!waiter.is_finished(), "caller should be waiting for a token");

  limiter.close();
  let result = timeout(Duration::from_millis(200), waiter)
    .await
    .expect("blocked caller was not woken by close")
    .unwrap();
  assert_eq!(result, Err(ToolkitError::LimiterClosed));
}

#[tokio::test]
async fn test_zero_interval_rejected() {
  let result = RateLimiter::new(Duration::ZERO, TokioHandle::current());
  assert!(matches!(result, Err(ToolkitError::InvalidInterval(d)) if d.is_zero()));
}
