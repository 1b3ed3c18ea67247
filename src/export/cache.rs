// In-process cache of resolved data URIs, keyed by `url|key`
//
// Entries are write-once. Eviction is opt-in: the default policy keeps
// everything for the process lifetime.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// How the cache bounds its memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Never evict
    #[default]
    Unbounded,
    /// Keep at most N entries, dropping the oldest insert first
    Capacity(usize),
    /// Entries expire this long after insertion
    Ttl(Duration),
    /// Both limits
    CapacityTtl(usize, Duration),
}

impl EvictionPolicy {
    fn capacity(&self) -> Option<usize> {
        match self {
            Self::Capacity(n) | Self::CapacityTtl(n, _) => Some(*n),
            _ => None,
        }
    }

    fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Ttl(d) | Self::CapacityTtl(_, d) => Some(*d),
            _ => None,
        }
    }
}

/// Composite key for a (url, key) pair. Absent key becomes the empty string.
pub fn cache_key(url: &str, key: Option<&str>) -> String {
    format!("{}|{}", url, key.unwrap_or(""))
}

pub trait MediaCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` unless `key` is already present
    fn insert(&self, key: String, value: String);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    value: String,
    inserted: Instant,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    order: VecDeque<String>,
}

pub struct MemoryCache {
    policy: EvictionPolicy,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let mut inner = self.inner.lock();
        let expired = match (inner.map.get(key), self.policy.ttl()) {
            (None, _) => return None,
            (Some(entry), Some(ttl)) => now.saturating_duration_since(entry.inserted) >= ttl,
            (Some(_), None) => false,
        };

        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }

        inner.map.get(key).map(|e| e.value.clone())
    }

    fn insert_at(&self, key: String, value: String, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&key) {
            return;
        }

        if let Some(cap) = self.policy.capacity() {
            if cap == 0 {
                return;
            }
            while inner.map.len() >= cap {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.map.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        inner.order.push_back(key.clone());
        inner.map.insert(
            key,
            Entry {
                value,
                inserted: now,
            },
        );
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(EvictionPolicy::Unbounded)
    }
}

impl MediaCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    fn insert(&self, key: String, value: String) {
        self.insert_at(key, value, Instant::now())
    }

    fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("https://a/b", Some("12")), "https://a/b|12");
        assert_eq!(cache_key("https://a/b", None), "https://a/b|");
    }

    #[test]
    fn test_write_once() {
        let cache = MemoryCache::default();
        cache.insert("k".into(), "first".into());
        cache.insert("k".into(), "second".into());
        assert_eq!(cache.get("k").as_deref(), Some("first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = MemoryCache::new(EvictionPolicy::Capacity(2));
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.insert("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = MemoryCache::new(EvictionPolicy::Ttl(Duration::from_secs(60)));
        let t0 = Instant::now();
        cache.insert_at("k".into(), "v".into(), t0);

        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(59)).as_deref(), Some("v"));
        assert!(cache.get_at("k", t0 + Duration::from_secs(60)).is_none());
        assert!(cache.is_empty());
    }
}
