use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use moka::future::Cache as MokaCache;
use tokio::time::Instant;

use crate::error::GuardError;
use crate::jwk::JwkSet;
use crate::key_source::KeySource;

const KEY_SET: &str = "jwks";
const REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// Read-through cache over a [`KeySource`].
///
/// Concurrent misses share one fetch. Forced refreshes are serialized and
/// capped per minute so a stream of tokens with unknown key ids cannot turn
/// into a stream of requests against the key endpoint.
pub struct JwksCache {
    source: Arc<dyn KeySource>,
    keys: MokaCache<&'static str, Arc<JwkSet>>,
    refresh_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    limiter: RefreshLimiter,
}

impl JwksCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration, max_forced_refreshes_per_minute: u32) -> Self {
        let keys = MokaCache::builder()
            .max_capacity(1)
            .time_to_live(ttl)
            .build();

        Self {
            source,
            keys,
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            limiter: RefreshLimiter::new(max_forced_refreshes_per_minute as usize, REFRESH_WINDOW),
        }
    }

    /// Returns the cached set, fetching it when absent or past its TTL.
    pub async fn get(&self) -> Result<Arc<JwkSet>, GuardError> {
        self.keys
            .try_get_with(KEY_SET, self.load())
            .await
            .map_err(|e| (*e).clone())
    }

    /// Re-fetches the set regardless of TTL.
    ///
    /// Returns `Ok(None)` when the refresh budget is exhausted. A caller that
    /// waited behind a refresh completed by someone else gets that result
    /// without spending budget.
    pub async fn force_refresh(&self) -> Result<Option<Arc<JwkSet>>, GuardError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(current) = self.keys.get(KEY_SET).await {
                return Ok(Some(current));
            }
        }

        if !self.limiter.try_acquire() {
            warn!("Forced key set refresh throttled");
            return Ok(None);
        }

        let fresh = self.load().await?;
        self.keys.insert(KEY_SET, fresh.clone()).await;
        self.generation.fetch_add(1, Ordering::Release);
        debug!("Key set refreshed, {} key(s) published", fresh.keys.len());
        Ok(Some(fresh))
    }

    pub async fn invalidate(&self) {
        self.keys.invalidate(KEY_SET).await;
    }

    async fn load(&self) -> Result<Arc<JwkSet>, GuardError> {
        let set = self.source.fetch().await?;
        Ok(Arc::new(set))
    }
}

/// Sliding-window counter of forced refreshes.
struct RefreshLimiter {
    max_per_window: usize,
    window: Duration,
    recent: Mutex<VecDeque<Instant>>,
}

impl RefreshLimiter {
    fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            recent: Mutex::new(VecDeque::with_capacity(max_per_window)),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(oldest) = recent.front() {
            if now.duration_since(*oldest) >= self.window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() >= self.max_per_window {
            return false;
        }
        recent.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, CountingSource};

    fn cache_over(source: Arc<CountingSource>, ttl: Duration, budget: u32) -> JwksCache {
        JwksCache::new(source, ttl, budget)
    }

    #[tokio::test]
    async fn test_get_fetches_once_within_ttl() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        let cache = cache_over(source.clone(), Duration::from_secs(60), 5);

        for _ in 0..3 {
            let set = cache.get().await.unwrap();
            assert!(set.contains(testing::SIGNING_KID));
        }
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        let cache = Arc::new(cache_over(source.clone(), Duration::from_secs(60), 5));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        let cache = cache_over(source.clone(), Duration::from_millis(100), 5);

        cache.get().await.unwrap();
        source.publish(vec![testing::signing_jwk(), testing::rotated_jwk()]);
        tokio::time::sleep(Duration::from_millis(250)).await;

        let set = cache.get().await.unwrap();
        assert!(set.contains(testing::ROTATED_KID));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_cached_set() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        let cache = cache_over(source.clone(), Duration::from_secs(60), 5);

        cache.get().await.unwrap();
        source.publish(vec![testing::rotated_jwk()]);

        let fresh = cache.force_refresh().await.unwrap().unwrap();
        assert!(fresh.contains(testing::ROTATED_KID));
        assert!(cache.get().await.unwrap().contains(testing::ROTATED_KID));
    }

    #[tokio::test]
    async fn test_force_refresh_is_throttled() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        let cache = cache_over(source.clone(), Duration::from_secs(60), 2);

        assert!(cache.force_refresh().await.unwrap().is_some());
        assert!(cache.force_refresh().await.unwrap().is_some());
        assert!(cache.force_refresh().await.unwrap().is_none());
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_waiting_refreshers_reuse_completed_refresh() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        let cache = Arc::new(cache_over(source.clone(), Duration::from_secs(60), 10));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.force_refresh().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }
        assert!(source.fetches() < 8);
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_as_key_fetch() {
        let source = CountingSource::new(vec![testing::signing_jwk()]);
        source.fail(true);
        let cache = cache_over(source.clone(), Duration::from_secs(60), 5);

        let err = cache.get().await.unwrap_err();
        assert!(err.is_transient());

        source.fail(false);
        assert!(cache.get().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_window_slides() {
        let limiter = RefreshLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_acquire());
    }
}
