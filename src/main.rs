//! trainrush gateway entry point.
//!
//! ```text
//! ┌────────┐   ┌──────────────┐   ┌───────────────────┐   ┌──────────┐
//! │  HTTP  │──▶│ Orchestrator │──▶│ Lock + CAS + Cache │──▶│  Broker  │
//! │ (axum) │   │ / ReadThrough│   │   + Distributed    │   │ (lapin)  │
//! └────────┘   └──────────────┘   └───────────────────┘   └──────────┘
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use trainrush::config::AppConfig;
use trainrush::distributed_cache::{DistributedCache, RedisBackend};
use trainrush::http::state::AppState;
use trainrush::local_cache::LocalCache;
use trainrush::logging;
use trainrush::order_broker::{LapinBackend, OrderBroker};
use trainrush::protector::Protector;
use trainrush::safe_lock::RedisLockBackend;
use trainrush::seat_store::{PgSeatStore, SeatStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = logging::init_logging(&config);
    config.log_effective();

    tracing::info!(git_hash = env!("GIT_HASH"), "starting trainrush");

    let store = Arc::new(PgSeatStore::connect(&config.database_url).await?);
    store.health_check().await?;

    let protector = Arc::new(Protector::new(&config));

    let distinct_tags = store.distinct_tags().await?;
    for tag in &distinct_tags {
        protector.bloom.insert(tag);
    }
    tracing::info!(count = distinct_tags.len(), "seeded bloom filter from store");

    let cache_backend = Arc::new(RedisBackend::connect(&config.redis_url).await?);
    let distributed_cache = Arc::new(DistributedCache::new(cache_backend, protector.clone()));
    let local_cache = Arc::new(LocalCache::new(config.local_cache_ttl));

    let lock_backend = Arc::new(RedisLockBackend::connect(&config.redis_url).await?);

    let broker_backend = Arc::new(LapinBackend::connect(&config.amqp_url).await?);
    let consumer_cancel = CancellationToken::new();
    broker_backend
        .spawn_consumer(store.clone(), consumer_cancel.clone())
        .await?;
    let broker = Arc::new(OrderBroker::new(broker_backend));

    let state = AppState::new(
        store,
        local_cache,
        distributed_cache,
        protector,
        lock_backend,
        broker,
        config.lock_ttl,
        config.lock_max_retries,
        config.lock_retry_delay,
    );

    let router = trainrush::http::build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(consumer_cancel))
        .await?;

    Ok(())
}

async fn shutdown_signal(consumer_cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    consumer_cancel.cancel();
}
