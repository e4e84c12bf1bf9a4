//! In-process cache of "this key is known empty until T" markers, guarding
//! against repeated lookups for keys that don't (yet) exist upstream.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Default)]
pub struct NegativeCache {
    entries: DashMap<String, Instant>,
}

impl NegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_null(&self, key: &str, ttl: Duration) {
        self.entries.insert(key.to_string(), Instant::now() + ttl);
    }

    pub fn is_null_cached(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                drop(self.entries.remove(key));
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_expires() {
        let cache = NegativeCache::new();
        cache.cache_null("G101", Duration::from_millis(5));
        assert!(cache.is_null_cached("G101"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(!cache.is_null_cached("G101"));
    }
}
