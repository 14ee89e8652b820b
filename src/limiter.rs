use crate::error::ToolkitError;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// An admission gate holding at most one token, refilled once per interval.
///
/// The limiter starts with one token, so the first `allow` never waits.
/// Ticks that find the slot already full are dropped, so tokens never
/// accumulate and the long-run admission rate is at most one per interval.
///
/// `close` is idempotent. After it, `allow` fails with
/// `ToolkitError::LimiterClosed` instead of waiting for a token that will
/// never arrive, and callers already waiting are woken with the same error.
pub struct RateLimiter {
  interval: Duration,
  tokens: Arc<Semaphore>,
  stop_token: CancellationToken,
  refill_join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for RateLimiter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RateLimiter")
      .field("interval", &self.interval)
      .field("available_tokens", &self.tokens.available_permits())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl RateLimiter {
  /// Creates a limiter issuing one token per `interval`, with its refill
  /// loop spawned on `tokio_handle`.
  ///
  /// # Errors
  /// Returns `ToolkitError::InvalidInterval` if `interval` is zero.
  pub fn new(interval: Duration, tokio_handle: TokioHandle) -> Result<Self, ToolkitError> {
    if interval.is_zero() {
      return Err(ToolkitError::InvalidInterval(interval));
    }

    let tokens = Arc::new(Semaphore::new(1));
    let stop_token = CancellationToken::new();
    let first_tick = Instant::now() + interval;

    let refill_join_handle = tokio_handle.spawn(
      Self::run_refill_loop(interval, first_tick, tokens.clone(), stop_token.clone()).instrument(info_span!(
        "rate_limiter_refill_loop",
        interval_ms = interval.as_millis() as u64
      )),
    );

    Ok(Self {
      interval,
      tokens,
      stop_token,
      refill_join_handle: Mutex::new(Some(refill_join_handle)),
    })
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn is_closed(&self) -> bool {
    self.stop_token.is_cancelled()
  }

  /// Waits until a token is available and consumes it.
  ///
  /// # Errors
  /// Returns `ToolkitError::LimiterClosed` if the limiter is closed before
  /// or while waiting.
  pub async fn allow(&self) -> Result<(), ToolkitError> {
    match self.tokens.acquire().await {
      Ok(permit) => {
        // The token is consumed, not returned to the slot.
        permit.forget();
        trace!("Token consumed.");
        Ok(())
      }
      Err(_) => {
        warn!("Allow: Limiter is closed, no token will be issued.");
        Err(ToolkitError::LimiterClosed)
      }
    }
  }

  /// Consumes a token if one is available right now.
  ///
  /// Returns `Ok(true)` if a token was consumed and `Ok(false)` if the slot
  /// was empty.
  ///
  /// # Errors
  /// Returns `ToolkitError::LimiterClosed` if the limiter is closed.
  pub fn try_allow(&self) -> Result<bool, ToolkitError> {
    match self.tokens.try_acquire() {
      Ok(permit) => {
        permit.forget();
        Ok(true)
      }
      Err(TryAcquireError::NoPermits) => Ok(false),
      Err(TryAcquireError::Closed) => Err(ToolkitError::LimiterClosed),
    }
  }

  /// Permanently stops replenishment and wakes any waiting callers.
  /// Calling it more than once is a no-op.
  pub fn close(&self) {
    if self.stop_token.is_cancelled() {
      debug!("Close: Limiter already closed.");
      return;
    }
    info!(interval = ?self.interval, "Closing rate limiter.");
    self.stop_token.cancel();
    self.tokens.close();
  }

  /// Closes the limiter and waits for its refill loop to exit.
  pub async fn shutdown(&self) {
    self.close();

    let handle_to_await = self.refill_join_handle.lock().take();
    if let Some(handle) = handle_to_await {
      match handle.await {
        Ok(()) => debug!("Refill loop successfully joined."),
        Err(join_error) => error!("Error joining refill loop during shutdown: {:?}", join_error),
      }
    } else {
      trace!("Refill loop handle already taken by an earlier shutdown.");
    }
  }

  async fn run_refill_loop(interval: Duration, first_tick: Instant, tokens: Arc<Semaphore>, stop_token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    trace!("Refill loop started.");

    loop {
      tokio::select! {
        biased;

        _ = stop_token.cancelled() => {
          debug!("Stop signal received. Refill loop terminating.");
          break;
        }

        _ = ticker.tick() => {
          // This loop is the only place permits are added, so the slot
          // cannot be filled between the check and the deposit.
          if tokens.available_permits() == 0 {
            tokens.add_permits(1);
            trace!("Token deposited.");
          } else {
            trace!("Token slot already full. Tick dropped.");
          }
        }
      }
    }
  }
}

impl Drop for RateLimiter {
  fn drop(&mut self) {
    if !self.stop_token.is_cancelled() {
      debug!("RateLimiter dropped without close. Stopping refill loop.");
      self.stop_token.cancel();
      self.tokens.close();
    }
  }
}
