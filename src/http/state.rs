//! Shared application state handed to every Axum handler.

use std::sync::Arc;

use crate::distributed_cache::DistributedCache;
use crate::local_cache::LocalCache;
use crate::order_broker::OrderBroker;
use crate::orchestrator::PurchaseOrchestrator;
use crate::protector::Protector;
use crate::read_through::ReadThroughService;
use crate::safe_lock::LockBackend;
use crate::seat_store::SeatStore;

#[derive(Clone)]
pub struct AppState {
    pub read_through: Arc<ReadThroughService>,
    pub orchestrator: Arc<PurchaseOrchestrator>,
    pub local_cache: Arc<LocalCache>,
    pub distributed_cache: Arc<DistributedCache>,
    pub store: Arc<dyn SeatStore>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SeatStore>,
        local_cache: Arc<LocalCache>,
        distributed_cache: Arc<DistributedCache>,
        protector: Arc<Protector>,
        lock_backend: Arc<dyn LockBackend>,
        broker: Arc<OrderBroker>,
        lock_ttl: std::time::Duration,
        lock_max_retries: u32,
        lock_retry_delay: std::time::Duration,
    ) -> Self {
        let read_through = Arc::new(ReadThroughService::new(
            local_cache.clone(),
            distributed_cache.clone(),
            store.clone(),
            protector.clone(),
        ));
        let orchestrator = Arc::new(PurchaseOrchestrator::new(
            lock_backend,
            lock_ttl,
            lock_max_retries,
            lock_retry_delay,
            store.clone(),
            distributed_cache.clone(),
            local_cache.clone(),
            broker,
        ));
        Self {
            read_through,
            orchestrator,
            local_cache,
            distributed_cache,
            store,
        }
    }
}
