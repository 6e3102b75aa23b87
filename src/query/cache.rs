use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on cached responses; the oldest entry is evicted past it.
pub const MAX_ENTRIES: usize = 1024;

/// Thread-safe cache of serialized query responses with TTL-based expiration.
///
/// Entries are keyed by the endpoint name plus the JSON form of the request,
/// so two descriptors that differ in any field never share an entry.
///
/// Every [`clear`](Self::clear) starts a new generation. A result computed
/// under an older generation is dropped by [`insert_at`](Self::insert_at).
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

impl QueryCache {
    /// Create a new cache with the given TTL in seconds.
    /// A TTL of 0 disables caching (all lookups miss).
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Cache key for a request on `endpoint`.
    pub fn key_for<T: Serialize>(endpoint: &str, request: &T) -> Option<String> {
        serde_json::to_string(request)
            .ok()
            .map(|json| format!("{endpoint}:{json}"))
    }

    /// Look up a cached value by key. Returns `None` if missing or expired.
    pub fn get(&self, key: &str) -> Option<String> {
        if self.ttl.is_zero() {
            return None;
        }
        self.entries.lock().get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() > self.ttl {
                None
            } else {
                Some(entry.value.clone())
            }
        })
    }

    /// Current generation; read it before computing a result to cache.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn insert(&self, key: String, value: String) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock();
        Self::insert_locked(&mut entries, key, value);
    }

    /// Insert only if no `clear` happened since `generation` was read.
    /// Returns `false` when the value was stale and discarded.
    pub fn insert_at(&self, generation: u64, key: String, value: String) -> bool {
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        if !self.ttl.is_zero() {
            Self::insert_locked(&mut entries, key, value);
        }
        true
    }

    fn insert_locked(entries: &mut HashMap<String, CacheEntry>, key: String, value: String) {
        if entries.len() >= MAX_ENTRIES && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry. Called after new views are processed.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Remove expired entries from the cache.
    pub fn cleanup_expired(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
