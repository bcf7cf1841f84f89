//! Key cache tests.
//!
//! ## Test focus
//! - **TTL**: entries past their time-to-live are never served
//! - **Invalidation**: explicit drops force the next lookup to miss
//! - **Single flight**: concurrent misses on one URL run one fetch
//! - **Failure handling**: a failed fetch is shared with its waiters but not
//!   cached
//! - **Refresh**: forced refetches are rate limited by entry age

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use super::test_helpers::*;
use crate::{KeyCache, KeyFetchError, KeySet, VerifyError};

const URL: &str = "https://issuer.example.com/oauth2/v1/keys";
const OTHER_URL: &str = "https://other.example.com/oauth2/v1/keys";

#[cfg(test)]
mod tests {
    use super::*;

    fn primary_set() -> Arc<KeySet> {
        Arc::new(key_set(&[(&PRIMARY_KEY, TEST_KID)]))
    }

    #[test]
    fn test_cache_key_is_deterministic_digest() {
        let key = KeyCache::cache_key(URL);
        assert_eq!(key, KeyCache::cache_key(URL));
        assert_ne!(key, KeyCache::cache_key(OTHER_URL));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_get_put_invalidate() {
        let cache = KeyCache::new();
        assert!(cache.get(URL).await.is_none());

        cache.put(URL, primary_set(), Duration::from_secs(60)).await;
        let cached = cache.get(URL).await.expect("cached");
        assert_eq!(cached.keys().len(), 1);
        assert!(cached.is_fresh());
        assert!(cache.get(OTHER_URL).await.is_none());

        cache.invalidate(URL).await;
        assert!(cache.get(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_not_served() {
        let cache = KeyCache::new();
        cache.put(URL, primary_set(), Duration::from_millis(50)).await;
        assert!(cache.get(URL).await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_entry() {
        let cache = KeyCache::new();
        cache.put(URL, primary_set(), Duration::from_secs(60)).await;

        let replacement = Arc::new(key_set(&[
            (&PRIMARY_KEY, TEST_KID),
            (&SECONDARY_KEY, OTHER_KID),
        ]));
        cache.put(URL, replacement, Duration::from_secs(60)).await;

        let cached = cache.get(URL).await.expect("cached");
        assert_eq!(cached.keys().len(), 2);
        assert!(cached.keys().find(OTHER_KID).is_some());
    }

    #[tokio::test]
    async fn test_get_or_fetch_uses_fresh_entry() {
        let cache = KeyCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, KeyFetchError>(key_set(&[(&PRIMARY_KEY, TEST_KID)]))
        };

        cache
            .get_or_fetch(URL, Duration::from_secs(60), fetch)
            .await
            .expect("first");
        cache
            .get_or_fetch(URL, Duration::from_secs(60), fetch)
            .await
            .expect("second");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_fetch_refetches_after_ttl() {
        let cache = KeyCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, KeyFetchError>(key_set(&[(&PRIMARY_KEY, TEST_KID)]))
        };

        let ttl = Duration::from_millis(50);
        cache.get_or_fetch(URL, ttl, fetch).await.expect("first");
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.get_or_fetch(URL, ttl, fetch).await.expect("second");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_not_cached() {
        let cache = KeyCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<KeySet, _>(KeyFetchError::Timeout {
                url: URL.to_string(),
            })
        };

        let ttl = Duration::from_secs(60);
        assert!(cache.get_or_fetch(URL, ttl, fetch).await.is_err());
        assert!(cache.get(URL).await.is_none());

        // A later call starts a fresh fetch.
        assert!(cache.get_or_fetch(URL, ttl, fetch).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_failure() {
        let cache = Arc::new(KeyCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let started = std::time::Instant::now();

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.spawn(async move {
                cache
                    .get_or_fetch(URL, Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Err::<KeySet, _>(KeyFetchError::Timeout {
                            url: URL.to_string(),
                        })
                    })
                    .await
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert_eq!(
                result.expect("task").expect_err("shared failure"),
                VerifyError::KeyFetch(KeyFetchError::Timeout {
                    url: URL.to_string()
                })
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // One fetch's worth of latency, not one per waiter.
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(cache.get(URL).await.is_none());
        assert_eq!(cache.fetches_in_flight().await, 0);

        let retried = cache
            .get_or_fetch(URL, Duration::from_secs(60), || async {
                Ok::<_, KeyFetchError>(key_set(&[(&PRIMARY_KEY, TEST_KID)]))
            })
            .await
            .expect("later call refetches");
        assert_eq!(retried.len(), 1);
    }

    #[tokio::test]
    async fn test_finished_fetches_leave_no_flight_behind() {
        let cache = KeyCache::new();
        for url in [URL, OTHER_URL] {
            cache
                .get_or_fetch(url, Duration::from_secs(60), || async {
                    Ok::<_, KeyFetchError>(KeySet::default())
                })
                .await
                .expect("fetch");
        }
        let failed = cache
            .get_or_fetch(URL, Duration::from_secs(1), || async {
                Err::<KeySet, _>(KeyFetchError::Decode("bad".to_string()))
            })
            .await;
        // The fresh entry from above is served; no fetch runs.
        assert!(failed.is_ok());

        cache.invalidate(URL).await;
        let failed = cache
            .get_or_fetch(URL, Duration::from_secs(60), || async {
                Err::<KeySet, _>(KeyFetchError::Decode("bad".to_string()))
            })
            .await;
        assert!(failed.is_err());

        assert_eq!(cache.fetches_in_flight().await, 0);
    }

    // ==================== Refresh ====================

    #[tokio::test]
    async fn test_refresh_skipped_for_recent_entry() {
        let cache = KeyCache::new();
        cache.put(URL, primary_set(), Duration::from_secs(60)).await;
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let refreshed = cache
            .refresh(URL, Duration::from_secs(30), Duration::from_secs(60), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, KeyFetchError>(KeySet::default())
            })
            .await
            .expect("refresh");

        assert!(refreshed.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_entry_past_cooldown() {
        let cache = KeyCache::new();
        cache.put(URL, primary_set(), Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let refreshed = cache
            .refresh(URL, Duration::from_millis(50), Duration::from_secs(60), || async {
                Ok::<_, KeyFetchError>(key_set(&[
                    (&PRIMARY_KEY, TEST_KID),
                    (&SECONDARY_KEY, OTHER_KID),
                ]))
            })
            .await
            .expect("refresh")
            .expect("refetched");

        assert_eq!(refreshed.len(), 2);
        let cached = cache.get(URL).await.expect("cached");
        assert!(cached.keys().find(OTHER_KID).is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_keys() {
        let cache = KeyCache::new();
        cache.put(URL, primary_set(), Duration::from_secs(60)).await;

        let err = cache
            .refresh(URL, Duration::ZERO, Duration::from_secs(60), || async {
                Err::<KeySet, _>(KeyFetchError::Status {
                    url: URL.to_string(),
                    status: 503,
                })
            })
            .await
            .expect_err("refetch fails");

        assert!(err.is_retryable());
        let cached = cache.get(URL).await.expect("still cached");
        assert!(cached.keys().find(TEST_KID).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = Arc::new(KeyCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.spawn(async move {
                cache
                    .get_or_fetch(URL, Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, KeyFetchError>(key_set(&[(&PRIMARY_KEY, TEST_KID)]))
                    })
                    .await
                    .map(|keys| keys.len())
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.expect("task").expect("keys"), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_urls_fetch_independently() {
        let cache = Arc::new(KeyCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for url in [URL, OTHER_URL, URL, OTHER_URL] {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.spawn(async move {
                cache
                    .get_or_fetch(url, Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, KeyFetchError>(KeySet::default())
                    })
                    .await
                    .is_ok()
            });
        }

        while let Some(result) = tasks.join_next().await {
            assert!(result.expect("task"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
