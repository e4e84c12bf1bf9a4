//! Remote hash-store cache: one hash per `train_tag`, one field per
//! `seat_id`, value = JSON-serialized [`Seat`]. Backed by Redis in
//! production; abstracted behind [`CacheBackend`] so [`DistributedCache`]'s
//! defense logic is testable without a live Redis instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::core_types::TrainTag;
use crate::error::{CoreError, CoreResult};
use crate::models::Seat;
use crate::protector::Protector;

/// Hash-store primitives [`DistributedCache`] needs. Kept deliberately thin
/// (`hset`/`hgetall`/`hdel`/`hlen`/`expire`) to mirror the original system's
/// direct `HSet`/`HGetAll`/`HDel` Redis usage.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn hset(&self, hash_key: &str, field: &str, value: &str) -> CoreResult<()>;
    async fn hgetall(&self, hash_key: &str) -> CoreResult<HashMap<String, String>>;
    async fn hdel_all(&self, hash_key: &str) -> CoreResult<()>;
    async fn hlen(&self, hash_key: &str) -> CoreResult<usize>;
    async fn expire(&self, hash_key: &str, ttl: Duration) -> CoreResult<()>;
}

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn hset(&self, hash_key: &str, field: &str, value: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(hash_key, field, value).await?;
        Ok(())
    }

    async fn hgetall(&self, hash_key: &str) -> CoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(hash_key).await?;
        Ok(map)
    }

    async fn hdel_all(&self, hash_key: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(hash_key).await?;
        Ok(())
    }

    async fn hlen(&self, hash_key: &str) -> CoreResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.hlen(hash_key).await?;
        Ok(len)
    }

    async fn expire(&self, hash_key: &str, ttl: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(hash_key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

/// In-memory stand-in for tests that exercise [`DistributedCache`]'s defense
/// logic without a live Redis instance.
#[derive(Default)]
pub struct InMemoryBackend {
    hashes: DashMap<String, HashMap<String, String>>,
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn hset(&self, hash_key: &str, field: &str, value: &str) -> CoreResult<()> {
        self.hashes
            .entry(hash_key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, hash_key: &str) -> CoreResult<HashMap<String, String>> {
        Ok(self
            .hashes
            .get(hash_key)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn hdel_all(&self, hash_key: &str) -> CoreResult<()> {
        self.hashes.remove(hash_key);
        Ok(())
    }

    async fn hlen(&self, hash_key: &str) -> CoreResult<usize> {
        Ok(self.hashes.get(hash_key).map(|m| m.len()).unwrap_or(0))
    }

    async fn expire(&self, _hash_key: &str, _ttl: Duration) -> CoreResult<()> {
        Ok(())
    }
}

pub struct DistributedCache {
    backend: Arc<dyn CacheBackend>,
    protector: Arc<Protector>,
}

impl DistributedCache {
    pub fn new(backend: Arc<dyn CacheBackend>, protector: Arc<Protector>) -> Self {
        Self { backend, protector }
    }

    /// Full defensive read path: limiter -> Bloom admission -> negative
    /// cache -> per-key single flight -> fetch. A tag the Bloom filter has
    /// never seen is rejected outright (`NotFound`) without touching the
    /// backend; a tag that is known but currently empty still resolves to
    /// `Ok(vec![])`.
    pub async fn get_by_tag(&self, tag: &TrainTag) -> CoreResult<Vec<Seat>> {
        if !self.protector.limiter.allow().await {
            return Err(CoreError::Throttled);
        }
        if !self.protector.bloom.might_contain(tag) {
            return Err(CoreError::NotFound);
        }
        if self.protector.negative_cache.is_null_cached(tag) {
            return Ok(Vec::new());
        }

        let lock = self.protector.key_mutex.get_for(tag);
        let _guard = lock.lock().await;
        self.protector.mark_hot(tag);

        let raw = self.backend.hgetall(tag).await?;
        if raw.is_empty() {
            self.protector
                .negative_cache
                .cache_null(tag, Duration::from_secs(300));
            return Ok(Vec::new());
        }

        let seats = raw
            .values()
            .filter_map(|json| serde_json::from_str::<Seat>(json).ok())
            .collect();
        Ok(seats)
    }

    /// Upserts a single seat's field, refreshes the hash's jittered TTL, and
    /// admits the tag into the Bloom filter.
    pub async fn sync(&self, seat: &Seat) -> CoreResult<()> {
        let value = serde_json::to_string(seat)
            .map_err(|e| CoreError::CacheSyncFailed(e.to_string()))?;
        self.backend
            .hset(&seat.train_tag, &seat.seat_id.to_string(), &value)
            .await?;
        self.backend
            .expire(&seat.train_tag, self.protector.jittered_ttl())
            .await?;
        self.protector.bloom.insert(&seat.train_tag);
        Ok(())
    }

    pub async fn invalidate(&self, tag: &TrainTag) -> CoreResult<()> {
        self.backend.hdel_all(tag).await
    }

    pub async fn cache_stats(&self, tag: &TrainTag) -> CoreResult<usize> {
        self.backend.hlen(tag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::SeatStatus;
    use rust_decimal::Decimal;

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://u:p@localhost/db".into(),
            redis_url: "redis://localhost".into(),
            amqp_url: "amqp://localhost".into(),
            port: 8080,
            rate_limit_capacity: 1000,
            rate_limit_refill_per_sec: 1000,
            local_cache_ttl: Duration::from_secs(30),
            distributed_cache_ttl_base: Duration::from_secs(300),
            bloom_size_bits: 4096,
            bloom_hashes: 4,
            lock_ttl: Duration::from_secs(10),
            lock_max_retries: 3,
            lock_retry_delay: Duration::from_millis(100),
            log_level: "info".into(),
            log_dir: "./logs".into(),
            log_file: "test.log".into(),
            rotation: "never".into(),
            use_json: false,
        }
    }

    fn seat(id: i64, tag: &str) -> Seat {
        let now = chrono::Utc::now();
        Seat {
            seat_id: id,
            train_tag: tag.to_string(),
            seat_number: "1A".into(),
            price: Decimal::new(9999, 2),
            status: SeatStatus::Available,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn absent_tag_is_rejected_by_bloom_without_backend_call() {
        let protector = Arc::new(Protector::new(&test_config()));
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryBackend::default());
        let cache = DistributedCache::new(backend, protector);
        let result = cache.get_by_tag(&"never-synced".to_string()).await;
        assert!(matches!(result, Err(CoreError::NotFound)));
    }

    #[tokio::test]
    async fn sync_then_get_round_trips() {
        let protector = Arc::new(Protector::new(&test_config()));
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryBackend::default());
        let cache = DistributedCache::new(backend, protector);
        cache.sync(&seat(1, "G101")).await.unwrap();
        let got = cache.get_by_tag(&"G101".to_string()).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seat_id, 1);
    }

    #[tokio::test]
    async fn invalidate_empties_the_tag() {
        let protector = Arc::new(Protector::new(&test_config()));
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryBackend::default());
        let cache = DistributedCache::new(backend, protector);
        cache.sync(&seat(1, "G101")).await.unwrap();
        cache.invalidate(&"G101".to_string()).await.unwrap();
        let got = cache.get_by_tag(&"G101".to_string()).await.unwrap();
        assert!(got.is_empty());
    }
}
