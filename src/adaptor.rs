//! Capability interface between the [`crate::Verifier`] and whatever fetches
//! keys and checks signatures.
//!
//! [`JwtAdaptor`] is the stock implementation: HTTP fetch through a shared
//! [`KeyCache`], RSA key reconstruction, and RS256 verification via
//! `jsonwebtoken`. Hosts can supply their own [`Adaptor`] (for instance one
//! backed by a different crypto library) without touching the verifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::KeyCache;
use crate::config::DEFAULT_KEY_REFRESH_COOLDOWN_SECS;
use crate::claims::DecodedJwt;
use crate::error::{KeyParseError, VerifyError};
use crate::jwks::{KeySetFetcher, RawKeySet};
use crate::key::{self, KeySet};
use crate::parser::JwtParser;

/// Key retrieval and token decoding, as one pluggable unit.
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Returns the usable keys published at `jwks_url`.
    async fn get_keys(&self, jwks_url: &str) -> Result<Arc<KeySet>, VerifyError>;

    /// Verifies `token` against `keys` and extracts its claims.
    fn decode(&self, token: &str, keys: &KeySet, leeway: Duration)
        -> Result<DecodedJwt, VerifyError>;

    /// Forgets any cached keys for `jwks_url`.
    async fn invalidate(&self, jwks_url: &str);

    /// Refetches the keys at `jwks_url` after a `kid` miss.
    ///
    /// Returns `Ok(None)` when no refetch was made, e.g. because the keys were
    /// fetched too recently. The default never refetches.
    async fn refresh_keys(&self, _jwks_url: &str) -> Result<Option<Arc<KeySet>>, VerifyError> {
        Ok(None)
    }
}

/// Default [`Adaptor`] built on `reqwest` and `jsonwebtoken`.
#[derive(Debug, Clone)]
pub struct JwtAdaptor {
    cache: Arc<KeyCache>,
    fetcher: KeySetFetcher,
    ttl: Duration,
    refresh_cooldown: Duration,
}

impl JwtAdaptor {
    /// `ttl` bounds how long fetched keys are served from `cache`.
    pub fn new(cache: Arc<KeyCache>, fetcher: KeySetFetcher, ttl: Duration) -> Self {
        Self {
            cache,
            fetcher,
            ttl,
            refresh_cooldown: Duration::from_secs(DEFAULT_KEY_REFRESH_COOLDOWN_SECS),
        }
    }

    /// Minimum age of the cached keys before a `kid` miss may refetch them.
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    async fn fetch_key_set(&self, jwks_url: &str) -> Result<KeySet, VerifyError> {
        let raw = self.fetcher.fetch(jwks_url).await?;
        Ok(reconstruct_all(jwks_url, raw)?)
    }
}

/// Reconstructs every usable key, skipping (and logging) the rest.
///
/// # Errors
///
/// [`KeyParseError::NoUsableKeys`] if nothing in `raw` is usable.
pub fn reconstruct_all(jwks_url: &str, raw: RawKeySet) -> Result<KeySet, KeyParseError> {
    let total = raw.len();
    let mut keys = Vec::with_capacity(total);
    for (id, jwk) in raw.keys {
        match key::reconstruct(&jwk) {
            Ok(public_key) => keys.push((id, public_key)),
            Err(e) => {
                tracing::warn!(jwks_url = %jwks_url, key = %id, error = %e, "Skipping unusable JWK");
            }
        }
    }

    if keys.is_empty() {
        tracing::error!(jwks_url = %jwks_url, total, "JWKS contains no usable keys");
        return Err(KeyParseError::NoUsableKeys {
            url: jwks_url.to_string(),
        });
    }
    Ok(KeySet::new(keys))
}

#[async_trait]
impl Adaptor for JwtAdaptor {
    async fn get_keys(&self, jwks_url: &str) -> Result<Arc<KeySet>, VerifyError> {
        self.cache
            .get_or_fetch(jwks_url, self.ttl, || self.fetch_key_set(jwks_url))
            .await
    }

    fn decode(
        &self,
        token: &str,
        keys: &KeySet,
        leeway: Duration,
    ) -> Result<DecodedJwt, VerifyError> {
        JwtParser::decode(token, keys, leeway)
    }

    async fn invalidate(&self, jwks_url: &str) {
        self.cache.invalidate(jwks_url).await;
    }

    async fn refresh_keys(&self, jwks_url: &str) -> Result<Option<Arc<KeySet>>, VerifyError> {
        self.cache
            .refresh(jwks_url, self.refresh_cooldown, self.ttl, || {
                self.fetch_key_set(jwks_url)
            })
            .await
    }
}
