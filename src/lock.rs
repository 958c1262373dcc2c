//! Per-function single-holder lock
//!
//! Built on the cache's `SET NX EX` primitive under `lock:function:{id}`.
//! The value is a random acquirer token; release and renewal are
//! compare-and-delete / compare-and-expire against that token, so a lock
//! that expired and was re-acquired by someone else is never touched.
//!
//! Liveness: every critical section is bounded by the lock TTL; a crashed
//! holder loses the lock within that bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::cache::CacheStore;
use crate::core_types::FunctionId;
use crate::error::{EngineError, with_retry};

/// Lock tunables. Defaults follow the deployment defaults: 5 s TTL, 3 s max
/// wait, 100 ms base backoff doubling to a 1 s cap with ±25% jitter.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub ttl: Duration,
    pub wait_max: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub jitter_pct: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            wait_max: Duration::from_secs(3),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(1),
            jitter_pct: 25,
        }
    }
}

/// Acquired lock handle. Must be released explicitly; if the holder dies the
/// TTL reclaims it.
pub struct FunctionLock {
    cache: Arc<dyn CacheStore>,
    key: String,
    token: String,
    ttl: Duration,
    acquired_at: Instant,
}

impl FunctionLock {
    /// Refresh the TTL when more than half of it has elapsed. Fails with
    /// `LockBusy` if the token no longer matches (the lock expired and was
    /// re-acquired).
    pub async fn renew(&mut self) -> Result<(), EngineError> {
        if self.acquired_at.elapsed() <= self.ttl / 2 {
            return Ok(());
        }
        let refreshed =
            with_retry(|| self.cache.expire_if_value(&self.key, &self.token, self.ttl)).await?;
        if !refreshed {
            tracing::warn!(key = %self.key, "Lock expired mid-critical-section");
            return Err(EngineError::LockBusy);
        }
        self.acquired_at = Instant::now();
        Ok(())
    }

    /// Compare-and-delete release. A lock that already expired is a no-op.
    pub async fn release(self) -> Result<(), EngineError> {
        let released = with_retry(|| self.cache.delete_if_value(&self.key, &self.token)).await?;
        if !released {
            tracing::debug!(key = %self.key, "Lock already expired at release");
        }
        Ok(())
    }
}

/// Acquires per-function locks with bounded exponential backoff.
#[derive(Clone)]
pub struct FunctionLockManager {
    cache: Arc<dyn CacheStore>,
    config: LockConfig,
}

impl FunctionLockManager {
    pub fn new(cache: Arc<dyn CacheStore>, config: LockConfig) -> Self {
        Self { cache, config }
    }

    fn lock_key(function: FunctionId) -> String {
        format!("lock:function:{function}")
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let pct = self.config.jitter_pct.min(100);
        let low = 100 - pct;
        let high = 100 + pct;
        let factor = rand::thread_rng().gen_range(low..=high) as u64;
        delay * factor as u32 / 100
    }

    /// Try to acquire the function's lock, retrying with backoff until
    /// `wait_max` elapses, then fail with `LockBusy`.
    pub async fn acquire(&self, function: FunctionId) -> Result<FunctionLock, EngineError> {
        let key = Self::lock_key(function);
        let token = hex::encode(rand::random::<[u8; 16]>());
        let started = Instant::now();
        let mut delay = self.config.backoff_base;

        loop {
            // Contention is handled by this loop's backoff; transient cache
            // failures go through the shared retry policy
            let acquired =
                with_retry(|| self.cache.set_if_absent(&key, &token, self.config.ttl)).await?;
            if acquired {
                tracing::debug!(function = %function, "Function lock acquired");
                return Ok(FunctionLock {
                    cache: self.cache.clone(),
                    key,
                    token,
                    ttl: self.config.ttl,
                    acquired_at: Instant::now(),
                });
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.wait_max {
                tracing::debug!(function = %function, ?elapsed, "Lock wait exhausted");
                return Err(EngineError::LockBusy);
            }

            let remaining = self.config.wait_max - elapsed;
            let sleep_for = self.jitter(delay).min(remaining);
            tokio::time::sleep(sleep_for).await;
            delay = (delay * 2).min(self.config.backoff_cap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use uuid::Uuid;

    fn fast_config() -> LockConfig {
        LockConfig {
            ttl: Duration::from_millis(200),
            wait_max: Duration::from_millis(60),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(20),
            jitter_pct: 25,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let manager = FunctionLockManager::new(cache.clone(), fast_config());
        let function = Uuid::new_v4();

        let lock = manager.acquire(function).await.unwrap();
        lock.release().await.unwrap();

        // Re-acquirable after release
        let lock = manager.acquire(function).await.unwrap();
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_contention_times_out() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let manager = FunctionLockManager::new(cache.clone(), fast_config());
        let function = Uuid::new_v4();

        let held = manager.acquire(function).await.unwrap();
        let result = manager.acquire(function).await;
        assert!(matches!(result, Err(EngineError::LockBusy)));
        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimed() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let mut config = fast_config();
        config.ttl = Duration::from_millis(30);
        let manager = FunctionLockManager::new(cache.clone(), config);
        let function = Uuid::new_v4();

        let stale = manager.acquire(function).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // TTL elapsed: a new acquirer wins, and the stale handle's release
        // must not delete the new holder's lock.
        let fresh = manager.acquire(function).await.unwrap();
        stale.release().await.unwrap();
        assert!(
            cache
                .get(&FunctionLockManager::lock_key(function))
                .await
                .unwrap()
                .is_some()
        );
        fresh.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_renewal_keeps_lock_alive() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let mut config = fast_config();
        config.ttl = Duration::from_millis(80);
        let manager = FunctionLockManager::new(cache.clone(), config);
        let function = Uuid::new_v4();

        let mut lock = manager.acquire(function).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        lock.renew().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Without the renewal the TTL would have elapsed by now
        assert!(
            cache
                .get(&FunctionLockManager::lock_key(function))
                .await
                .unwrap()
                .is_some()
        );
        lock.release().await.unwrap();
    }
}
