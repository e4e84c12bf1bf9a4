//! `PurchaseOrchestrator` — the end-to-end buy flow: acquire the seat's
//! distributed lock, transition it under row-level optimistic concurrency
//! control, sync the cache, enqueue the order, then invalidate the local
//! cache once the database transaction commits.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core_types::{SeatId, UserRef};
use crate::distributed_cache::DistributedCache;
use crate::error::{CoreError, CoreResult};
use crate::local_cache::LocalCache;
use crate::models::{Order, SeatStatus};
use crate::order_broker::OrderBroker;
use crate::safe_lock::LockBackend;
use crate::seat_store::SeatStore;

pub struct PurchaseOrchestrator {
    lock_backend: Arc<dyn LockBackend>,
    lock_ttl: Duration,
    lock_max_retries: u32,
    lock_retry_delay: Duration,
    store: Arc<dyn SeatStore>,
    cache: Arc<DistributedCache>,
    local: Arc<LocalCache>,
    broker: Arc<OrderBroker>,
}

impl PurchaseOrchestrator {
    pub fn new(
        lock_backend: Arc<dyn LockBackend>,
        lock_ttl: Duration,
        lock_max_retries: u32,
        lock_retry_delay: Duration,
        store: Arc<dyn SeatStore>,
        cache: Arc<DistributedCache>,
        local: Arc<LocalCache>,
        broker: Arc<OrderBroker>,
    ) -> Self {
        Self {
            lock_backend,
            lock_ttl,
            lock_max_retries,
            lock_retry_delay,
            store,
            cache,
            local,
            broker,
        }
    }

    pub async fn buy(
        &self,
        seat_id: SeatId,
        user_ref: UserRef,
        cancel: &CancellationToken,
    ) -> CoreResult<Order> {
        let mut lock = crate::safe_lock::SafeLock::new(
            self.lock_backend.clone(),
            seat_id,
            self.lock_ttl,
            self.lock_max_retries,
            self.lock_retry_delay,
        );

        if !lock.acquire(cancel).await? {
            return Err(CoreError::Busy);
        }

        let result = self.buy_locked(seat_id, user_ref, cancel).await;

        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, seat_id, "lock release failed");
        }

        result
    }

    /// Best-effort: on transaction rollback the store row has already
    /// reverted, but a distributed-cache snapshot synced earlier in this
    /// attempt may still reflect the rolled-back state. Invalidating it
    /// forces the next read to rebuild from the store. Failure here is
    /// logged, not propagated — the caller's own error takes precedence.
    async fn invalidate_best_effort(&self, train_tag: &str) {
        if let Err(e) = self.cache.invalidate(&train_tag.to_string()).await {
            tracing::warn!(error = %e, train_tag, "distributed cache invalidate after rollback failed");
        }
    }

    async fn buy_locked(
        &self,
        seat_id: SeatId,
        user_ref: UserRef,
        cancel: &CancellationToken,
    ) -> CoreResult<Order> {
        let mut tx = self.store.begin().await?;

        let seat = match tx.get(seat_id).await? {
            Some(seat) => seat,
            None => {
                tx.rollback().await?;
                return Err(CoreError::NotFound);
            }
        };

        if !seat.is_available() {
            tx.rollback().await?;
            self.invalidate_best_effort(&seat.train_tag).await;
            return Err(CoreError::Unavailable);
        }

        let applied = tx
            .cas_status_retry(seat_id, SeatStatus::Sold, 3, cancel)
            .await?;
        if !applied {
            tx.rollback().await?;
            self.invalidate_best_effort(&seat.train_tag).await;
            return Err(CoreError::LostRace);
        }

        let mut sold_seat = seat;
        sold_seat.status = SeatStatus::Sold;
        sold_seat.version += 1;

        if let Err(e) = self.cache.sync(&sold_seat).await {
            tx.rollback().await?;
            self.invalidate_best_effort(&sold_seat.train_tag).await;
            return Err(CoreError::CacheSyncFailed(e.to_string()));
        }

        let order = Order::new_pending(Uuid::new_v4().to_string(), user_ref, &sold_seat);

        if let Err(e) = self.broker.send(&order).await {
            tx.rollback().await?;
            self.invalidate_best_effort(&sold_seat.train_tag).await;
            return Err(CoreError::BrokerSendFailed(e.to_string()));
        }

        tx.commit().await?;

        self.local.invalidate(&sold_seat.train_tag);

        tracing::info!(
            seat_id,
            order_id = %order.order_id,
            train_tag = %sold_seat.train_tag,
            "seat purchase committed"
        );

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::distributed_cache::{CacheBackend, InMemoryBackend};
    use crate::models::SeatStatus;
    use crate::order_broker::InMemoryBroker;
    use crate::protector::Protector;
    use crate::safe_lock::InMemoryLockBackend;
    use crate::seat_store::InMemorySeatStore;
    use rust_decimal::Decimal;

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://u:p@localhost/db".into(),
            redis_url: "redis://localhost".into(),
            amqp_url: "amqp://localhost".into(),
            port: 8080,
            rate_limit_capacity: 100_000,
            rate_limit_refill_per_sec: 100_000,
            local_cache_ttl: Duration::from_secs(30),
            distributed_cache_ttl_base: Duration::from_secs(300),
            bloom_size_bits: 4096,
            bloom_hashes: 4,
            lock_ttl: Duration::from_secs(10),
            lock_max_retries: 3,
            lock_retry_delay: Duration::from_millis(5),
            log_level: "info".into(),
            log_dir: "./logs".into(),
            log_file: "test.log".into(),
            rotation: "never".into(),
            use_json: false,
        }
    }

    fn seat(id: i64, tag: &str) -> crate::models::Seat {
        let now = chrono::Utc::now();
        crate::models::Seat {
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

    fn build_orchestrator(
        store: Arc<dyn SeatStore>,
    ) -> (PurchaseOrchestrator, tokio::sync::mpsc::UnboundedReceiver<Order>) {
        let config = test_config();
        let protector = Arc::new(Protector::new(&config));
        let cache = Arc::new(DistributedCache::new(
            Arc::new(InMemoryBackend::default()),
            protector,
        ));
        let local = Arc::new(LocalCache::new(config.local_cache_ttl));
        let (broker_backend, rx) = InMemoryBroker::new();
        let broker = Arc::new(OrderBroker::new(Arc::new(broker_backend)));
        let lock_backend = Arc::new(InMemoryLockBackend::default());

        let orchestrator = PurchaseOrchestrator::new(
            lock_backend,
            config.lock_ttl,
            config.lock_max_retries,
            config.lock_retry_delay,
            store,
            cache,
            local,
            broker,
        );
        (orchestrator, rx)
    }

    #[tokio::test]
    async fn successful_purchase_enqueues_order_and_invalidates_local_cache() {
        let store = Arc::new(InMemorySeatStore::new());
        store.seed(seat(1, "G101"));
        let (orchestrator, mut rx) = build_orchestrator(store.clone());
        let cancel = CancellationToken::new();

        let order = orchestrator
            .buy(1, "user-1".to_string(), &cancel)
            .await
            .unwrap();
        assert_eq!(order.seat_id, 1);

        let enqueued = rx.recv().await.unwrap();
        assert_eq!(enqueued.order_id, order.order_id);

        let seat_after = store.get(1).await.unwrap().unwrap();
        assert_eq!(seat_after.status, SeatStatus::Sold);
        assert_eq!(seat_after.version, 1);
    }

    #[tokio::test]
    async fn only_one_of_many_concurrent_buyers_wins() {
        let store = Arc::new(InMemorySeatStore::new());
        store.seed(seat(1, "G101"));
        let (orchestrator, _rx) = build_orchestrator(store.clone());
        let orchestrator = Arc::new(orchestrator);

        let mut handles = Vec::new();
        for i in 0..20 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                orchestrator.buy(1, format!("user-{i}"), &cancel).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        let seat_after = store.get(1).await.unwrap().unwrap();
        assert_eq!(seat_after.status, SeatStatus::Sold);
        assert_eq!(seat_after.version, 1);
    }

    #[tokio::test]
    async fn buying_an_unavailable_seat_fails() {
        let store = Arc::new(InMemorySeatStore::new());
        store.seed(seat(1, "G101"));
        let (orchestrator, _rx) = build_orchestrator(store.clone());
        let cancel = CancellationToken::new();

        orchestrator
            .buy(1, "user-1".to_string(), &cancel)
            .await
            .unwrap();
        let second = orchestrator.buy(1, "user-2".to_string(), &cancel).await;
        assert!(matches!(second, Err(CoreError::Unavailable)));
    }

    #[tokio::test]
    async fn buying_a_missing_seat_returns_not_found() {
        let store = Arc::new(InMemorySeatStore::new());
        let (orchestrator, _rx) = build_orchestrator(store);
        let cancel = CancellationToken::new();
        let result = orchestrator.buy(999, "user-1".to_string(), &cancel).await;
        assert!(matches!(result, Err(CoreError::NotFound)));
    }

    struct FailingBroker;

    #[async_trait::async_trait]
    impl crate::order_broker::BrokerBackend for FailingBroker {
        async fn send(&self, _order: &Order) -> CoreResult<()> {
            Err(CoreError::BrokerSendFailed("simulated outage".into()))
        }
    }

    #[tokio::test]
    async fn broker_failure_rolls_back_and_invalidates_distributed_cache() {
        let config = test_config();
        let protector = Arc::new(Protector::new(&config));
        let cache_backend: Arc<InMemoryBackend> = Arc::new(InMemoryBackend::default());
        let cache = Arc::new(DistributedCache::new(
            cache_backend.clone(),
            protector.clone(),
        ));
        let local = Arc::new(LocalCache::new(config.local_cache_ttl));
        let broker = Arc::new(OrderBroker::new(Arc::new(FailingBroker)));
        let lock_backend = Arc::new(InMemoryLockBackend::default());

        let store = Arc::new(InMemorySeatStore::new());
        store.seed(seat(1, "G101"));
        // Seed the Bloom filter and the distributed cache the way a live
        // seat would already be represented before this purchase attempt.
        let seeded = store.get(1).await.unwrap().unwrap();
        cache.sync(&seeded).await.unwrap();

        let orchestrator = PurchaseOrchestrator::new(
            lock_backend,
            config.lock_ttl,
            config.lock_max_retries,
            config.lock_retry_delay,
            store.clone(),
            cache.clone(),
            local,
            broker,
        );
        let cancel = CancellationToken::new();

        let result = orchestrator.buy(1, "user-1".to_string(), &cancel).await;
        assert!(matches!(result, Err(CoreError::BrokerSendFailed(_))));

        // Store reverted to Available (the transaction rolled back)...
        let seat_after = store.get(1).await.unwrap().unwrap();
        assert_eq!(seat_after.status, SeatStatus::Available);

        // ...and the distributed cache no longer holds the stale `Sold`
        // snapshot synced mid-attempt.
        assert_eq!(cache_backend.hlen("G101").await.unwrap(), 0);
    }
}
