//! Bounded in-memory cache with least-recently-used eviction.
//!
//! Values are retained weakly: the cache never forces a value to stay alive,
//! and eviction never forces destruction of a value that is still referenced
//! elsewhere. The strong owner lives outside the cache (typically the display
//! layer or the active play session); once every strong reference is gone,
//! a later `get` observes the dead handle, prunes it, and reports a miss.

use crate::key::CacheKey;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Default entry-count capacity.
pub const DEFAULT_CAPACITY: usize = 20;

/// Fixed-capacity key-to-value cache with LRU eviction and weak value
/// retention. Purely in-memory; a single mutex guards the map and the
/// recency order.
pub struct BoundedMemoryCache<V> {
    inner: Mutex<LruCache<CacheKey, Weak<V>>>,
}

impl<V> BoundedMemoryCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(non_zero(capacity))),
        }
    }

    /// Look up a value, marking it most recently used.
    ///
    /// A handle whose value has been dropped elsewhere behaves as a miss
    /// and the stale entry is removed.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let mut cache = self.inner.lock();
        match cache.get(key).and_then(Weak::upgrade) {
            Some(value) => Some(value),
            None => {
                if cache.pop(key).is_some() {
                    debug!(key = %key, "pruned invalidated cache entry");
                }
                None
            }
        }
    }

    /// Insert a non-owning handle to `value`, evicting the least recently
    /// used entry if the cache is full.
    pub fn put(&self, key: CacheKey, value: &Arc<V>) {
        self.inner.lock().put(key, Arc::downgrade(value));
    }

    /// Change the capacity, evicting LRU entries until within bound.
    /// Idempotent and safe to call concurrently with `get`/`put`.
    pub fn resize(&self, capacity: usize) {
        self.inner.lock().resize(non_zero(capacity));
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of resident entries (live or not yet pruned).
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).expect("clamped to >= 1")
}

impl<V> Default for BoundedMemoryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
