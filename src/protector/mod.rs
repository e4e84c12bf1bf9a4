//! Cache-defense primitives standing between [`crate::read_through`] and the
//! distributed cache: single-flight per key, negative caching, TTL jitter,
//! a Bloom-filter admission check, and a token-bucket request limiter.

pub mod bloom;
pub mod key_mutex;
pub mod limiter;
pub mod negative_cache;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

use crate::config::AppConfig;
use bloom::BloomFilter;
use key_mutex::KeyMutexTable;
use limiter::TokenBucketLimiter;
use negative_cache::NegativeCache;

pub struct Protector {
    pub limiter: Arc<TokenBucketLimiter>,
    pub negative_cache: NegativeCache,
    pub key_mutex: KeyMutexTable,
    pub bloom: BloomFilter,
    ttl_base: Duration,
    hot_marks: DashMap<String, AtomicU64>,
}

impl Protector {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            limiter: TokenBucketLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_refill_per_sec,
            ),
            negative_cache: NegativeCache::new(),
            key_mutex: KeyMutexTable::new(),
            bloom: BloomFilter::new(config.bloom_size_bits, config.bloom_hashes),
            ttl_base: config.distributed_cache_ttl_base,
            hot_marks: DashMap::new(),
        }
    }

    /// Jittered TTL: `base * u`, `u ~ Uniform[1.0, 1.3]`. Spreads expirations
    /// to avoid a thundering-herd re-fill when many keys were written at the
    /// same moment.
    pub fn jittered_ttl(&self) -> Duration {
        let factor: f64 = rand::thread_rng().gen_range(1.0..1.3);
        Duration::from_secs_f64(self.ttl_base.as_secs_f64() * factor)
    }

    /// Observability only: records that `key` was accessed. Never gates
    /// behavior.
    pub fn mark_hot(&self, key: &str) {
        self.hot_marks
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn hot_count(&self, key: &str) -> u64 {
        self.hot_marks
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
