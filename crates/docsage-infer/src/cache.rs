//! LRU + TTL cache of embeddings keyed by a SHA-256 of the input text.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ndarray::Array1;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

struct CacheEntry {
    embedding: Array1<f32>,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Least recently used at the front.
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl CacheInner {
    fn forget(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Thread-safe embedding cache.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                ttl,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn key_for(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn get(&self, text: &str) -> Option<Array1<f32>> {
        let key = Self::key_for(text);
        let mut inner = self.inner.lock();

        let ttl = inner.ttl;
        let lookup = inner
            .entries
            .get(&key)
            .map(|e| (e.inserted_at.elapsed() < ttl, e.embedding.clone()));
        let fresh = match lookup {
            Some((true, embedding)) => Some(embedding),
            Some((false, _)) => {
                inner.forget(&key);
                None
            }
            None => None,
        };

        match fresh {
            Some(embedding) => {
                inner.hits += 1;
                inner.promote(&key);
                Some(embedding)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, text: &str, embedding: Array1<f32>) {
        let key = Self::key_for(text);
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&key) {
            inner.promote(&key);
        } else {
            while inner.entries.len() >= inner.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(key.clone());
        }
        inner.entries.insert(
            key,
            CacheEntry {
                embedding,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            capacity: inner.capacity,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_hit_and_miss_counted() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(60));
        assert!(cache.get("budget 2024").is_none());
        cache.put("budget 2024", array![0.1, 0.2]);
        assert_eq!(cache.get("budget 2024"), Some(array![0.1, 0.2]));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_least_recently_used_evicted() {
        let cache = EmbeddingCache::new(2, Duration::from_secs(60));
        cache.put("a", array![1.0]);
        cache.put("b", array![2.0]);
        assert!(cache.get("a").is_some());
        cache.put("c", array![3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_expired_entry_dropped() {
        let cache = EmbeddingCache::new(4, Duration::from_millis(1));
        cache.put("short-lived", array![1.0]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("short-lived").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_refreshes_value() {
        let cache = EmbeddingCache::new(4, Duration::from_secs(60));
        cache.put("q", array![1.0]);
        cache.put("q", array![2.0]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("q"), Some(array![2.0]));
    }
}
