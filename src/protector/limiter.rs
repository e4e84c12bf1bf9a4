//! Token-bucket request limiter: a non-blocking `allow()` for the hot path
//! plus a cancellable `wait()` for callers willing to queue briefly. Tokens
//! are replenished by a dedicated periodic refiller task rather than being
//! computed lazily on the read path, one task per limiter instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REFILL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("rate limit exceeded")]
    Throttled,
    #[error("wait cancelled")]
    Cancelled,
}

pub struct RateLimiterMetrics {
    pub allowed: AtomicU64,
    pub throttled: AtomicU64,
}

impl Default for RateLimiterMetrics {
    fn default() -> Self {
        Self {
            allowed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }
}

/// A single shared token bucket. Construct one per process (or per
/// protected resource); `allow`/`wait` are safe to call concurrently.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    tokens: Mutex<f64>,
    pub metrics: RateLimiterMetrics,
    refiller: StdMutex<Option<JoinHandle<()>>>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: u64, refill_per_sec: u64) -> Arc<Self> {
        let limiter = Arc::new(Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            tokens: Mutex::new(capacity as f64),
            metrics: RateLimiterMetrics::default(),
            refiller: StdMutex::new(None),
        });

        let weak = Arc::downgrade(&limiter);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFILL_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    return;
                };
                let mut tokens = limiter.tokens.lock().await;
                *tokens = (*tokens + REFILL_INTERVAL.as_secs_f64() * limiter.refill_per_sec)
                    .min(limiter.capacity);
            }
        });
        *limiter.refiller.lock().unwrap() = Some(handle);

        limiter
    }

    /// Non-blocking admission check for the hot path.
    pub async fn allow(&self) -> bool {
        let mut tokens = self.tokens.lock().await;
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.metrics.throttled.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Polls for a token up to `timeout`, honoring cancellation. Intended
    /// for callers that would rather wait briefly than be rejected outright.
    pub async fn wait(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), LimiterError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.allow().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LimiterError::Throttled);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    }
}

impl Drop for TokenBucketLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.refiller.lock().unwrap().take() {
            handle.abort();
        }
    }
}
