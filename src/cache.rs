use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A small process-wide cache with a fixed TTL per entry and manual
/// invalidation by key or key prefix.
///
/// Entries past their TTL are treated as absent on read and dropped lazily;
/// there is no background sweeper since the handful of keys this service
/// caches never amounts to meaningful memory.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().ok()?;
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), (Instant::now(), value));
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|key, _| !key.starts_with(prefix));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_was_set() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn expired_entries_are_absent() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.set("a", 1);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn invalidate_drops_a_single_key() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn invalidate_prefix_only_drops_matching_keys() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("points:1", 6);
        cache.set("points:2", 3);
        cache.set("title", 0);
        cache.invalidate_prefix("points:");
        assert_eq!(cache.get("points:1"), None);
        assert_eq!(cache.get("points:2"), None);
        assert_eq!(cache.get("title"), Some(0));
    }

    #[test]
    fn clear_drops_everything() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }
}
