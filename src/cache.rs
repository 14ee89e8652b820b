use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

const NIL: usize = usize::MAX;

struct Node<K, V> {
  key: K,
  value: V,
  prev: usize,
  next: usize,
}

/// A fixed-capacity key/value store that evicts the least-recently-used
/// entry when full.
///
/// Entries live in a slab of doubly-linked nodes addressed by index, with a
/// `HashMap` from key to slot. `get` and `put` both run in O(1): lookups go
/// through the map and recency updates only relink a node to the front. Once
/// the cache is full, the evicted tail slot is reused for the new entry, so
/// the slab never grows past `capacity`.
///
/// A capacity of zero is allowed: every `put` is evicted immediately and
/// handed back to the caller.
///
/// The cache is not synchronized. Wrap it in [`SharedLruCache`] to share it
/// between tasks.
pub struct LruCache<K, V> {
  capacity: usize,
  index: HashMap<K, usize>,
  nodes: Vec<Node<K, V>>,
  // Most-recently-used end.
  head: usize,
  // Least-recently-used end.
  tail: usize,
}

impl<K, V> fmt::Debug for LruCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LruCache")
      .field("capacity", &self.capacity)
      .field("len", &self.index.len())
      .finish_non_exhaustive()
  }
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      // Grown on demand; `capacity` may be far larger than what is ever stored.
      index: HashMap::new(),
      nodes: Vec::new(),
      head: NIL,
      tail: NIL,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index.is_empty()
  }

  /// Returns the value for `key` and marks it most-recently-used.
  /// A miss leaves the cache untouched.
  pub fn get(&mut self, key: &K) -> Option<&V> {
    let idx = *self.index.get(key)?;
    self.move_to_front(idx);
    Some(&self.nodes[idx].value)
  }

  /// Returns the value for `key` without changing its recency.
  pub fn peek(&self, key: &K) -> Option<&V> {
    self.index.get(key).map(|&idx| &self.nodes[idx].value)
  }

  /// Returns `true` if `key` is cached, without changing its recency.
  pub fn contains(&self, key: &K) -> bool {
    self.index.contains_key(key)
  }

  /// Inserts or updates `key`, making it most-recently-used.
  ///
  /// Inserting a new key into a full cache evicts the least-recently-used
  /// entry first; the evicted pair is returned. Updating an existing key
  /// never evicts.
  pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
    if let Some(&idx) = self.index.get(&key) {
      self.nodes[idx].value = value;
      self.move_to_front(idx);
      return None;
    }

    if self.capacity == 0 {
      trace!("Zero-capacity cache. Entry evicted on insert.");
      return Some((key, value));
    }

    if self.nodes.len() < self.capacity {
      let idx = self.nodes.len();
      self.nodes.push(Node {
        key: key.clone(),
        value,
        prev: NIL,
        next: NIL,
      });
      self.attach_front(idx);
      self.index.insert(key, idx);
      return None;
    }

    let idx = self.tail;
    assert!(idx != NIL, "full LRU cache has no tail entry");
    self.detach(idx);

    let node = &mut self.nodes[idx];
    let evicted_key = std::mem::replace(&mut node.key, key.clone());
    let evicted_value = std::mem::replace(&mut node.value, value);
    self.index.remove(&evicted_key);
    self.index.insert(key, idx);
    self.attach_front(idx);

    trace!(len = self.index.len(), "Evicted least-recently-used entry.");
    Some((evicted_key, evicted_value))
  }

  fn move_to_front(&mut self, idx: usize) {
    if self.head == idx {
      return;
    }
    self.detach(idx);
    self.attach_front(idx);
  }

  fn detach(&mut self, idx: usize) {
    let (prev, next) = {
      let node = &self.nodes[idx];
      (node.prev, node.next)
    };

    if prev == NIL {
      self.head = next;
    } else {
      self.nodes[prev].next = next;
    }
    if next == NIL {
      self.tail = prev;
    } else {
      self.nodes[next].prev = prev;
    }

    let node = &mut self.nodes[idx];
    node.prev = NIL;
    node.next = NIL;
  }

  fn attach_front(&mut self, idx: usize) {
    let old_head = self.head;
    {
      let node = &mut self.nodes[idx];
      node.prev = NIL;
      node.next = old_head;
    }
    if old_head != NIL {
      self.nodes[old_head].prev = idx;
    }
    self.head = idx;
    if self.tail == NIL {
      self.tail = idx;
    }
  }
}

/// A cloneable, mutex-guarded [`LruCache`] for concurrent callers.
///
/// Every operation takes the lock for its duration, so `get` still promotes
/// and values are handed out as clones.
pub struct SharedLruCache<K, V> {
  inner: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> Clone for SharedLruCache<K, V> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<K, V> fmt::Debug for SharedLruCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.inner.try_lock() {
      Some(cache) => f.debug_tuple("SharedLruCache").field(&*cache).finish(),
      None => f.debug_tuple("SharedLruCache").field(&"<locked>").finish(),
    }
  }
}

impl<K: Eq + Hash + Clone, V: Clone> SharedLruCache<K, V> {
  pub fn new(capacity: usize) -> Self {
    Self {
      inner: Arc::new(Mutex::new(LruCache::new(capacity))),
    }
  }

  pub fn get(&self, key: &K) -> Option<V> {
    self.inner.lock().get(key).cloned()
  }

  pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
    self.inner.lock().put(key, value)
  }

  pub fn contains(&self, key: &K) -> bool {
    self.inner.lock().contains(key)
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.inner.lock().capacity()
  }
}
