use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const MAX_ENTRIES: usize = 500;
const DEFAULT_TTL_SECS: i64 = 5 * 60;
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

struct Entry {
    value: Value,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, Entry>,
    // insertion order, oldest first; eviction is insertion-order, not LRU
    order: VecDeque<String>,
}

impl Store {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k.as_str() != key);
        }
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.order.retain(|key| self.entries.contains_key(key));
        before - self.entries.len()
    }
}

/// Read-through cache for GET-style responses, keyed by URL plus query.
/// Bounded; under pressure expired entries go first, then the
/// oldest-inserted one.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<Mutex<Store>>,
    capacity: usize,
    default_ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES, Duration::seconds(DEFAULT_TTL_SECS))
    }

    pub fn with_capacity(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            capacity,
            default_ttl,
        }
    }

    /// `None` on miss or expiry; an expired entry is evicted on the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut store = self.store.lock().unwrap();
        match store.entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.value.clone()),
            Some(_) => {
                store.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();
        if !store.entries.contains_key(key) && store.entries.len() >= self.capacity {
            if store.sweep(now) == 0 {
                if let Some(oldest) = store.order.pop_front() {
                    store.entries.remove(&oldest);
                }
            }
        }
        if store.entries.contains_key(key) {
            store.order.retain(|k| k.as_str() != key);
        }
        store.order.push_back(key.into());
        store.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: now + ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    /// Removes one key, or everything when no key is given.
    pub fn clear(&self, key: Option<&str>) {
        let mut store = self.store.lock().unwrap();
        match key {
            Some(key) => store.remove(key),
            None => {
                store.entries.clear();
                store.order.clear();
            }
        }
    }

    /// Removes every key containing `pattern`.
    pub fn clear_pattern(&self, pattern: &str) {
        let mut store = self.store.lock().unwrap();
        store.entries.retain(|key, _| !key.contains(pattern));
        let retained: Vec<_> = store
            .order
            .iter()
            .filter(|key| store.entries.contains_key(*key))
            .cloned()
            .collect();
        store.order = retained.into();
    }

    pub fn clear_dashboard(&self) {
        self.clear_pattern("/dashboard");
    }

    pub fn clear_projects(&self) {
        self.clear_pattern("/projects");
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries, returning how many were purged.
    pub fn sweep(&self) -> usize {
        self.store.lock().unwrap().sweep(Utc::now())
    }

    /// Purges expired entries on a fixed timer, independent of access
    /// patterns.
    pub fn spawn_sweeper(&self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let purged = cache.sweep();
                if purged > 0 {
                    tracing::debug!(purged, "cache sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expired_entry_reads_as_miss_and_is_evicted() {
        let cache = ResponseCache::new();
        cache.set("/api/x", json!({"n": 1}), Some(Duration::milliseconds(100)));
        assert_eq!(cache.get("/api/x"), Some(json!({"n": 1})));
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert_eq!(cache.get("/api/x"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn eviction_under_pressure_drops_oldest_inserted() {
        let cache = ResponseCache::with_capacity(3, Duration::minutes(5));
        cache.set("/a", json!(1), None);
        cache.set("/b", json!(2), None);
        cache.set("/c", json!(3), None);
        cache.set("/d", json!(4), None);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("/a"), None);
        assert_eq!(cache.get("/b"), Some(json!(2)));
        assert_eq!(cache.get("/d"), Some(json!(4)));
    }

    #[test]
    fn pressure_prefers_expired_entries() {
        let cache = ResponseCache::with_capacity(2, Duration::minutes(5));
        cache.set("/stale", json!(1), Some(Duration::milliseconds(50)));
        cache.set("/fresh", json!(2), None);
        std::thread::sleep(std::time::Duration::from_millis(80));
        cache.set("/new", json!(3), None);
        // the expired entry was reclaimed, the fresh oldest one survives
        assert_eq!(cache.get("/fresh"), Some(json!(2)));
        assert_eq!(cache.get("/new"), Some(json!(3)));
    }

    #[test]
    fn overwrite_does_not_grow_the_store() {
        let cache = ResponseCache::with_capacity(2, Duration::minutes(5));
        cache.set("/a", json!(1), None);
        cache.set("/a", json!(2), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("/a"), Some(json!(2)));
    }

    #[test]
    fn clear_pattern_removes_matching_keys_only() {
        let cache = ResponseCache::new();
        cache.set("/dashboard/summary", json!(1), None);
        cache.set("/dashboard/tasks?page=1", json!(2), None);
        cache.set("/projects/7", json!(3), None);
        cache.clear_dashboard();
        assert_eq!(cache.get("/dashboard/summary"), None);
        assert_eq!(cache.get("/dashboard/tasks?page=1"), None);
        assert_eq!(cache.get("/projects/7"), Some(json!(3)));
    }

    #[test]
    fn clear_without_key_empties_everything() {
        let cache = ResponseCache::new();
        cache.set("/a", json!(1), None);
        cache.set("/b", json!(2), None);
        cache.clear(Some("/a"));
        assert_eq!(cache.len(), 1);
        cache.clear(None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn sweeper_purges_expired_entries() {
        let cache = ResponseCache::new();
        cache.set("/a", json!(1), Some(Duration::milliseconds(10)));
        cache.set("/b", json!(2), None);
        let sweeper = cache.spawn_sweeper(std::time::Duration::from_millis(30));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        sweeper.abort();
        assert_eq!(cache.len(), 1);
    }
}
