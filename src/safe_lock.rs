//! Distributed mutex, one instance per protected seat. The state machine is
//! `New -> Acquiring -> Held <-> Renewing -> Released`; a failed renewal
//! transitions straight to `Released` so callers observe the loss instead of
//! believing they still hold the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Atomic primitives [`SafeLock`] needs from its backing store: conditional
/// set, compare-and-delete, compare-and-expire. Implemented server-side
/// (Lua script on Redis) so each is a single atomic round trip.
#[async_trait]
pub trait LockBackend: Send + Sync {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CoreResult<bool>;
    async fn compare_and_delete(&self, key: &str, token: &str) -> CoreResult<bool>;
    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> CoreResult<bool>;
}

pub struct RedisLockBackend {
    conn: ConnectionManager,
}

impl RedisLockBackend {
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

const CAD_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const CAE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("expire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(CAD_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = redis::Script::new(CAE_SCRIPT)
            .key(key)
            .arg(token)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }
}

/// In-memory stand-in for deterministic unit tests of lock contention,
/// crash recovery, and watchdog behavior without a live Redis instance.
#[derive(Default)]
pub struct InMemoryLockBackend {
    held: DashMap<String, (String, std::time::Instant)>,
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> CoreResult<bool> {
        let now = std::time::Instant::now();
        let expired = self
            .held
            .get(key)
            .map(|entry| entry.1 <= now)
            .unwrap_or(true);
        if expired {
            self.held
                .insert(key.to_string(), (token.to_string(), now + ttl));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> CoreResult<bool> {
        let matches = self
            .held
            .get(key)
            .map(|entry| entry.0 == token)
            .unwrap_or(false);
        if matches {
            self.held.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> CoreResult<bool> {
        let now = std::time::Instant::now();
        if let Some(mut entry) = self.held.get_mut(key) {
            if entry.0 == token {
                entry.1 = now + ttl;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// One lock attempt over one seat. Not reused across buy attempts: a fresh
/// [`SafeLock`] and a fresh token are created for every call into
/// [`crate::orchestrator::PurchaseOrchestrator::buy`].
pub struct SafeLock {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    ttl: Duration,
    max_retries: u32,
    retry_delay: Duration,
    released: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,
}

impl SafeLock {
    pub fn new(
        backend: Arc<dyn LockBackend>,
        seat_id: i64,
        ttl: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            backend,
            key: format!("ticket_lock_{seat_id}"),
            token: Uuid::new_v4().to_string(),
            ttl,
            max_retries,
            retry_delay,
            released: Arc::new(AtomicBool::new(false)),
            watchdog: None,
        }
    }

    /// Bounded retry with fixed backoff and a fresh token per attempt. On
    /// success, spawns a watchdog that renews the lock at `ttl / 2`. The
    /// backoff sleep observes `cancel` and returns `Cancelled` promptly
    /// instead of riding out the full delay.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> CoreResult<bool> {
        for attempt in 0..=self.max_retries {
            self.token = Uuid::new_v4().to_string();
            if self.backend.try_acquire(&self.key, &self.token, self.ttl).await? {
                self.spawn_watchdog();
                return Ok(true);
            }
            if attempt < self.max_retries {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        Ok(false)
    }

    fn spawn_watchdog(&mut self) {
        let backend = self.backend.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        let ttl = self.ttl;
        let released = self.released.clone();
        let interval = ttl / 2;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if released.load(Ordering::SeqCst) {
                    return;
                }
                match backend.compare_and_expire(&key, &token, ttl).await {
                    Ok(true) => continue,
                    _ => {
                        released.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
        });
        self.watchdog = Some(handle);
    }

    /// Idempotent. Stops the watchdog and awaits it before issuing the
    /// compare-and-delete, so the watchdog can never race a release with a
    /// renewal.
    pub async fn release(&mut self) -> CoreResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
            let _ = handle.await;
        }
        let deleted = self.backend.compare_and_delete(&self.key, &self.token).await?;
        if !deleted {
            tracing::warn!(key = %self.key, "lock release found key missing or foreign-owned");
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for SafeLock {
    fn drop(&mut self) {
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquirer_is_rejected() {
        let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::default());
        let cancel = CancellationToken::new();
        let mut first = SafeLock::new(backend.clone(), 1, Duration::from_secs(10), 0, Duration::from_millis(1));
        let mut second = SafeLock::new(backend, 1, Duration::from_secs(10), 0, Duration::from_millis(1));
        assert!(first.acquire(&cancel).await.unwrap());
        assert!(!second.acquire(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key_for_others() {
        let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::default());
        let cancel = CancellationToken::new();
        let mut first = SafeLock::new(backend.clone(), 1, Duration::from_secs(10), 0, Duration::from_millis(1));
        assert!(first.acquire(&cancel).await.unwrap());
        first.release().await.unwrap();

        let mut second = SafeLock::new(backend, 1, Duration::from_secs(10), 0, Duration::from_millis(1));
        assert!(second.acquire(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::default());
        let cancel = CancellationToken::new();
        let mut lock = SafeLock::new(backend, 1, Duration::from_secs(10), 0, Duration::from_millis(1));
        assert!(lock.acquire(&cancel).await.unwrap());
        lock.release().await.unwrap();
        lock.release().await.unwrap();
        assert!(lock.is_released());
    }

    #[tokio::test]
    async fn crash_recovery_after_ttl_expiry() {
        let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::default());
        let cancel = CancellationToken::new();
        let mut first =
            SafeLock::new(backend.clone(), 1, Duration::from_millis(20), 0, Duration::from_millis(1));
        assert!(first.acquire(&cancel).await.unwrap());
        // Simulate a crash: drop without releasing, and let the TTL lapse.
        drop(first);
        tokio::time::sleep(Duration::from_millis(40)).await;

        let mut second =
            SafeLock::new(backend, 1, Duration::from_millis(20), 0, Duration::from_millis(1));
        assert!(second.acquire(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_is_cancellable_during_backoff() {
        let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::default());
        let mut holder = SafeLock::new(backend.clone(), 1, Duration::from_secs(10), 0, Duration::from_millis(1));
        let unused_cancel = CancellationToken::new();
        assert!(holder.acquire(&unused_cancel).await.unwrap());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut contender = SafeLock::new(
            backend,
            1,
            Duration::from_secs(10),
            5,
            Duration::from_millis(50),
        );
        let result = contender.acquire(&cancel).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
