//! # Key Material Cache
//!
//! Stores reconstructed key sets per JWKS URL with a fixed time-to-live.
//!
//! ## Caching Strategy
//! 1. Entries older than their TTL are treated as absent (lazy eviction)
//! 2. Entries are replaced wholesale, never mutated in place
//! 3. Concurrent misses for the same URL share one fetch and its outcome
//! 4. Failures are never stored
//!
//! Entries are keyed by the SHA-256 digest of the JWKS URL.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::error::VerifyError;
use crate::key::KeySet;

/// A key set together with when it was fetched and how long it may be served.
#[derive(Debug, Clone)]
pub struct CachedKeySet {
    keys: Arc<KeySet>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedKeySet {
    pub fn new(keys: Arc<KeySet>, ttl: Duration) -> Self {
        Self {
            keys,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn keys(&self) -> &Arc<KeySet> {
        &self.keys
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Outcome of one in-flight fetch, shared with every caller that joined it.
type FetchOutcome = Result<Arc<KeySet>, VerifyError>;

/// Concurrency-safe cache of key sets keyed by JWKS URL.
///
/// Construct one per process (or per test) and share it behind an [`Arc`].
#[derive(Debug, Default)]
pub struct KeyCache {
    entries: RwLock<HashMap<String, CachedKeySet>>,
    /// Fetches currently running, one per URL. An entry lives only as long as
    /// its fetch.
    in_flight: Mutex<HashMap<String, Arc<OnceCell<FetchOutcome>>>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic cache key for a JWKS URL.
    pub fn cache_key(jwks_url: &str) -> String {
        let digest = Sha256::digest(jwks_url.as_bytes());
        format!("{digest:x}")
    }

    /// Returns the entry for `jwks_url` if it is still within its TTL.
    pub async fn get(&self, jwks_url: &str) -> Option<CachedKeySet> {
        let key = Self::cache_key(jwks_url);
        let entries = self.entries.read().await;
        entries.get(&key).filter(|entry| entry.is_fresh()).cloned()
    }

    /// Stores `keys` for `jwks_url`, replacing any previous entry.
    pub async fn put(&self, jwks_url: &str, keys: Arc<KeySet>, ttl: Duration) {
        let key = Self::cache_key(jwks_url);
        self.entries
            .write()
            .await
            .insert(key, CachedKeySet::new(keys, ttl));
    }

    /// Drops the entry for `jwks_url`. The next lookup misses.
    pub async fn invalidate(&self, jwks_url: &str) {
        let key = Self::cache_key(jwks_url);
        if self.entries.write().await.remove(&key).is_some() {
            tracing::debug!(jwks_url = %jwks_url, "Invalidated cached JWKS");
        }
    }

    /// Returns the fresh entry for `jwks_url`, or runs `fetch` to produce one.
    ///
    /// Concurrent callers missing on the same URL join a single `fetch` and
    /// all receive its outcome, success or failure. A failure is not stored:
    /// once the shared fetch has finished, the next call starts a new one.
    ///
    /// # Errors
    ///
    /// The error returned by the shared `fetch`.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        jwks_url: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Arc<KeySet>, VerifyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeySet, E>>,
        E: Into<VerifyError>,
    {
        if let Some(cached) = self.get(jwks_url).await {
            tracing::debug!(jwks_url = %jwks_url, "Using cached JWKS");
            return Ok(cached.keys);
        }

        self.fetch_shared(jwks_url, ttl, fetch, CachedKeySet::is_fresh)
            .await
    }

    /// Refetches the key set for `jwks_url` unless the cached one is younger
    /// than `min_age`.
    ///
    /// Returns `Ok(None)` when the refresh was skipped. The cached entry is
    /// kept if the refetch fails.
    ///
    /// # Errors
    ///
    /// The error returned by the shared `fetch`.
    pub async fn refresh<F, Fut, E>(
        &self,
        jwks_url: &str,
        min_age: Duration,
        ttl: Duration,
        fetch: F,
    ) -> Result<Option<Arc<KeySet>>, VerifyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeySet, E>>,
        E: Into<VerifyError>,
    {
        let recent =
            |entry: &CachedKeySet| entry.is_fresh() && entry.fetched_at.elapsed() < min_age;

        if let Some(cached) = self.get(jwks_url).await {
            if recent(&cached) {
                tracing::debug!(jwks_url = %jwks_url, "JWKS refreshed recently, skipping refetch");
                return Ok(None);
            }
        }

        self.fetch_shared(jwks_url, ttl, fetch, recent).await.map(Some)
    }

    /// Joins the in-flight fetch for `jwks_url`, or starts one.
    ///
    /// The caller that starts the fetch re-checks the cache with `reuse`
    /// first, so a fetch that completed just before it arrived is not repeated.
    async fn fetch_shared<F, Fut, E>(
        &self,
        jwks_url: &str,
        ttl: Duration,
        fetch: F,
        reuse: impl Fn(&CachedKeySet) -> bool,
    ) -> Result<Arc<KeySet>, VerifyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeySet, E>>,
        E: Into<VerifyError>,
    {
        let key = Self::cache_key(jwks_url);
        let flight = self.join_flight(&key).await;

        let (key_ref, flight_ref) = (&key, &flight);
        let outcome = flight
            .get_or_init(|| async move {
                let outcome = match self.get(jwks_url).await {
                    Some(cached) if reuse(&cached) => {
                        tracing::debug!(jwks_url = %jwks_url, "JWKS cache was filled while waiting for fetch");
                        Ok(cached.keys)
                    }
                    _ => self.run_fetch(jwks_url, ttl, fetch).await,
                };
                self.land_flight(key_ref, flight_ref).await;
                outcome
            })
            .await;

        outcome.clone()
    }

    async fn run_fetch<F, Fut, E>(&self, jwks_url: &str, ttl: Duration, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeySet, E>>,
        E: Into<VerifyError>,
    {
        match fetch().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                self.put(jwks_url, Arc::clone(&keys), ttl).await;
                tracing::info!(jwks_url = %jwks_url, keys = keys.len(), ttl_secs = ttl.as_secs(), "JWKS cache updated");
                Ok(keys)
            }
            Err(e) => {
                let error: VerifyError = e.into();
                tracing::warn!(jwks_url = %jwks_url, error = %error, "JWKS fetch failed");
                Err(error)
            }
        }
    }

    async fn join_flight(&self, key: &str) -> Arc<OnceCell<FetchOutcome>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(key.to_string()).or_default())
    }

    /// Removes a finished fetch so the next miss starts a new one. Callers
    /// already holding the cell still read its outcome.
    async fn land_flight(&self, key: &str, flight: &Arc<OnceCell<FetchOutcome>>) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
        {
            in_flight.remove(key);
        }
    }

    /// Number of fetches currently running.
    pub(crate) async fn fetches_in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
