//! TTL Cache
//!
//! Bounded key/value store with per-entry expiry and least-recently-used
//! eviction.
//!
//! # Design
//!
//! - Expiry is lazy: an expired entry is removed when it is read, and
//!   [`TtlCache::purge_expired`] (driven by [`spawn_sweeper`]) drops the rest.
//! - Recency is a queue of `(key, stamp)` pairs. Every read or write pushes
//!   a fresh stamp; older pairs for the same key go stale and are skipped
//!   when the queue is popped. The queue is compacted once stale pairs
//!   outnumber live entries, keeping both operations amortized O(1).
//! - Time comes from `tokio::time::Instant` so paused-clock tests control
//!   expiry.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Statistics
// =============================================================================

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Live entries (may include expired entries not yet swept).
    pub len: usize,
    /// Maximum entries.
    pub capacity: usize,
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries dropped to admit a new key.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    stamp: u64,
}

#[derive(Debug)]
struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,
    recency: VecDeque<(K, u64)>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Thread-safe TTL cache with LRU eviction.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use market_crypto_proxy::infrastructure::cache::TtlCache;
///
/// # tokio_test::block_on(async {
/// let cache = TtlCache::new(2);
/// cache.insert("a", 1, Duration::from_secs(10));
/// cache.insert("b", 2, Duration::from_secs(10));
///
/// // Touch "a" so "b" becomes least recently used.
/// assert_eq!(cache.get(&"a"), Some(1));
///
/// let evicted = cache.insert("c", 3, Duration::from_secs(10));
/// assert_eq!(evicted, Some("b"));
/// assert_eq!(cache.get(&"b"), None);
/// # });
/// ```
#[derive(Debug)]
pub struct TtlCache<K, V> {
    capacity: usize,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(capacity),
                recency: VecDeque::with_capacity(capacity),
                next_stamp: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, including expired ones not yet removed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a clone of the value for `key` if present and not expired.
    ///
    /// An expired entry counts as a miss and is removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => entry.expires_at <= now,
        };

        if expired {
            state.entries.remove(key);
            state.expirations += 1;
            state.misses += 1;
            state.compact_if_sparse();
            return None;
        }

        state.hits += 1;
        let stamp = state.touch(key.clone());
        let value = state.entries.get_mut(key).map(|entry| {
            entry.stamp = stamp;
            entry.value.clone()
        });
        state.compact_if_sparse();
        value
    }

    /// Like [`TtlCache::get`] but leaves counters, recency and expired
    /// entries untouched.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Overwriting an existing key never evicts. Admitting a new key at
    /// capacity first drops expired entries, then evicts the least recently
    /// used entry if still full. Returns the evicted key, if any.
    pub fn insert(&self, key: K, value: V, ttl: Duration) -> Option<K> {
        let now = Instant::now();
        let expires_at = now + ttl;
        let mut state = self.state.lock();

        if state.entries.contains_key(&key) {
            let stamp = state.touch(key.clone());
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.value = value;
                entry.expires_at = expires_at;
                entry.stamp = stamp;
            }
            state.compact_if_sparse();
            return None;
        }

        let mut evicted = None;
        if state.entries.len() >= self.capacity {
            state.remove_expired(now);
            if state.entries.len() >= self.capacity {
                evicted = state.evict_lru();
            }
        }

        // Stamp after eviction so the new key's recency slot is never popped.
        let stamp = state.touch(key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                stamp,
            },
        );
        state.compact_if_sparse();
        evicted
    }

    /// Remove `key`, returning its value if it was present and unexpired.
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.entries.remove(key)?;
        state.compact_if_sparse();
        (entry.expires_at > now).then_some(entry.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let removed = state.remove_expired(now);
        state.compact_if_sparse();
        removed
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            len: state.entries.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn touch(&mut self, key: K) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp = self.next_stamp.wrapping_add(1);
        self.recency.push_back((key, stamp));
        stamp
    }

    fn remove_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        self.expirations += u64::try_from(removed).unwrap_or(u64::MAX);
        removed
    }

    fn evict_lru(&mut self) -> Option<K> {
        while let Some((key, stamp)) = self.recency.pop_front() {
            let live = self
                .entries
                .get(&key)
                .is_some_and(|entry| entry.stamp == stamp);
            if live {
                self.entries.remove(&key);
                self.evictions += 1;
                return Some(key);
            }
        }

        tracing::error!(
            entries = self.entries.len(),
            "LRU queue exhausted while cache is full; recency bookkeeping is out of sync"
        );
        debug_assert!(
            self.entries.is_empty(),
            "recency queue empty with live entries"
        );

        let key = self.entries.keys().next().cloned()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }

    fn compact_if_sparse(&mut self) {
        if self.recency.len() <= self.entries.len().saturating_mul(2) + 16 {
            return;
        }

        let entries = &self.entries;
        self.recency.retain(|(key, stamp)| {
            entries
                .get(key)
                .is_some_and(|entry| entry.stamp == *stamp)
        });
    }
}

// =============================================================================
// Background Sweeper
// =============================================================================

/// Periodically purge expired entries until `cancel` fires.
pub fn spawn_sweeper<K, V>(
    cache: Arc<TtlCache<K, V>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Cache sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = cache.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
            }
        }
    })
}

// =============================================================================
// Tests
// =============================================================================
