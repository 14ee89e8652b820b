use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use parking_lot::Mutex;

/// A shared 64-bit counter that can only be incremented and read.
pub trait Counter: Send + Sync {
  fn inc(&self);

  fn value(&self) -> i64;
}

/// Counter guarded by a mutex; reads take the same lock as writes.
#[derive(Debug, Default)]
pub struct SafeCounter {
  n: Mutex<i64>,
}

impl SafeCounter {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Counter for SafeCounter {
  fn inc(&self) {
    *self.n.lock() += 1;
  }

  fn value(&self) -> i64 {
    *self.n.lock()
  }
}

/// Lock-free counter backed by an atomic integer.
#[derive(Debug, Default)]
pub struct AtomicCounter {
  n: AtomicI64,
}

impl AtomicCounter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Same as [`Counter::value`].
  pub fn get(&self) -> i64 {
    self.n.load(AtomicOrdering::SeqCst)
  }
}

impl Counter for AtomicCounter {
  fn inc(&self) {
    self.n.fetch_add(1, AtomicOrdering::SeqCst);
  }

  fn value(&self) -> i64 {
    self.get()
  }
}

/// Two counters behind separate locks that are always updated together.
///
/// Every access locks `first` and then `second`. Keeping that single order
/// everywhere is what rules out a lock-ordering deadlock between callers.
#[derive(Debug, Default)]
pub struct OrderedPair {
  first: Mutex<i64>,
  second: Mutex<i64>,
}

impl OrderedPair {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn increment_both(&self) {
    let mut first = self.first.lock();
    let mut second = self.second.lock();
    *first += 1;
    *second += 1;
  }

  /// Reads both values as one consistent snapshot.
  pub fn values(&self) -> (i64, i64) {
    let first = self.first.lock();
    let second = self.second.lock();
    (*first, *second)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_counters_start_at_zero() {
    assert_eq!(SafeCounter::new().value(), 0);
    assert_eq!(AtomicCounter::new().value(), 0);
    assert_eq!(OrderedPair::new().values(), (0, 0));
  }

  #[test]
  fn test_atomic_get_matches_value() {
    let counter = AtomicCounter::new();
    counter.inc();
    counter.inc();
    assert_eq!(counter.get(), 2);
    assert_eq!(counter.value(), counter.get());
  }

  #[test]
  fn test_ordered_pair_from_threads_stays_in_step() {
    let pair = OrderedPair::new();
    std::thread::scope(|s| {
      for _ in 0..8 {
        s.spawn(|| {
          for _ in 0..250 {
            pair.increment_both();
            let (a, b) = pair.values();
            assert_eq!(a, b);
          }
        });
      }
    });
    assert_eq!(pair.values(), (2000, 2000));
  }
}
