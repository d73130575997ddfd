use crate::persistence::DataRecord;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn get_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn get_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn get_evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

struct LruInner {
    map: HashMap<String, DataRecord>,
    /// Recency order, least recently used at the front.
    order: VecDeque<String>,
}

/// Bounded in-process cache mapping idempotency key to record, with
/// least-recently-used eviction. Scoped per process instance; purely an
/// optimization in front of the persistence store. Every read promotes the
/// entry, expired entries are evicted on access and reported as misses.
pub struct LocalCache {
    capacity: usize,
    inner: Mutex<LruInner>,
    stats: Arc<CacheStats>,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LruInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            stats: Arc::new(CacheStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    /// Looks up a record, promoting it on hit. A logically expired entry is
    /// dropped and treated as a miss rather than served stale.
    pub fn get(&self, idempotency_key: &str, now: DateTime<Utc>) -> Option<DataRecord> {
        let mut inner = self.lock();

        let expired = match inner.map.get(idempotency_key) {
            Some(record) => record.is_expired(now),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            tracing::debug!(idempotency_key, "evicting expired local cache record");
            Self::remove_entry(&mut inner, idempotency_key);
            self.stats.record_eviction();
            self.stats.record_miss();
            return None;
        }

        Self::promote(&mut inner, idempotency_key);
        self.stats.record_hit();
        inner.map.get(idempotency_key).cloned()
    }

    /// Inserts (or refreshes) a record, evicting the least recently used
    /// entry once over capacity.
    pub fn put(&self, record: DataRecord) {
        let mut inner = self.lock();
        let key = record.idempotency_key.clone();

        if inner.map.insert(key.clone(), record).is_some() {
            Self::promote(&mut inner, &key);
        } else {
            inner.order.push_back(key);
        }

        while inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                self.stats.record_eviction();
                tracing::debug!(idempotency_key = %oldest, "evicted least recently used record");
            } else {
                break;
            }
        }
    }

    pub fn remove(&self, idempotency_key: &str) {
        let mut inner = self.lock();
        Self::remove_entry(&mut inner, idempotency_key);
    }

    fn promote(inner: &mut LruInner, idempotency_key: &str) {
        if let Some(position) = inner.order.iter().position(|key| key == idempotency_key) {
            inner.order.remove(position);
            inner.order.push_back(idempotency_key.to_string());
        }
    }

    fn remove_entry(inner: &mut LruInner, idempotency_key: &str) {
        inner.map.remove(idempotency_key);
        if let Some(position) = inner.order.iter().position(|key| key == idempotency_key) {
            inner.order.remove(position);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
