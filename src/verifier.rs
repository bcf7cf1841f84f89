//! # Token Verifier
//!
//! Composes the pipeline: JWKS URL → cached keys (fetched on miss) →
//! signature and time checks → claim checks for the requested token type.
//! Any failing stage short-circuits with its typed error. Nothing is retried.
//! Structurally invalid tokens are rejected before keys are fetched.
//!
//! ## Key rotation
//! Cached keys are served until their TTL runs out. A token whose `kid` is
//! missing from the cached set triggers one refetch, but only when the cached
//! set is older than the configured refresh cooldown (60 seconds by default).
//! Inside that window a newly rotated key is rejected with
//! [`SignatureError::NoMatchingKey`]; [`Verifier::invalidate_keys`] forces the
//! next call to refetch.

use std::sync::Arc;

use crate::adaptor::{Adaptor, JwtAdaptor};
use crate::cache::KeyCache;
use crate::claims::{ClaimsValidationSpec, ClaimsValidator, DecodedJwt, TokenType};
use crate::config::VerifierConfig;
use crate::error::{KeyFetchError, SignatureError, VerifyError};
use crate::jwks::KeySetFetcher;
use crate::parser::JwtParser;

/// Verifies bearer tokens issued by one authorization server.
///
/// Cheap to clone; clones share the adaptor and therefore its cache.
#[derive(Clone)]
pub struct Verifier {
    config: Arc<VerifierConfig>,
    jwks_url: String,
    adaptor: Arc<dyn Adaptor>,
}

impl Verifier {
    /// Creates a verifier using `adaptor` for key retrieval and decoding.
    pub fn new(config: VerifierConfig, adaptor: Arc<dyn Adaptor>) -> Self {
        let jwks_url = config.jwks_url();
        Self {
            config: Arc::new(config),
            jwks_url,
            adaptor,
        }
    }

    /// Creates a verifier backed by [`JwtAdaptor`] and the given cache.
    ///
    /// # Errors
    ///
    /// [`KeyFetchError::ClientBuild`] if the HTTP client cannot be built.
    pub fn with_cache(config: VerifierConfig, cache: Arc<KeyCache>) -> Result<Self, KeyFetchError> {
        let fetcher = KeySetFetcher::new(config.http_timeout())?;
        let adaptor = JwtAdaptor::new(cache, fetcher, config.jwks_ttl())
            .with_refresh_cooldown(config.key_refresh_cooldown());
        Ok(Self::new(config, Arc::new(adaptor)))
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Verifies `token` as an access token.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify_token`].
    pub async fn verify(&self, token: &str) -> Result<DecodedJwt, VerifyError> {
        self.verify_access_token(token).await
    }

    /// Verifies `token` as an OIDC ID token: audience, then nonce.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify_token`].
    pub async fn verify_id_token(&self, token: &str) -> Result<DecodedJwt, VerifyError> {
        self.verify_token(token, TokenType::Id).await
    }

    /// Like [`Verifier::verify_id_token`], but expects `nonce` instead of the
    /// configured one.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify_token`].
    pub async fn verify_id_token_with_nonce(
        &self,
        token: &str,
        nonce: &str,
    ) -> Result<DecodedJwt, VerifyError> {
        let spec = ClaimsValidationSpec {
            nonce: Some(nonce.to_string()),
            ..self.config.claims_spec()
        };
        self.verify_with_spec(token, &spec, TokenType::Id).await
    }

    /// Verifies `token` as an access token: audience, then client id.
    ///
    /// # Errors
    ///
    /// See [`Verifier::verify_token`].
    pub async fn verify_access_token(&self, token: &str) -> Result<DecodedJwt, VerifyError> {
        self.verify_token(token, TokenType::Access).await
    }

    /// Runs the full pipeline with the configured claim expectations.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::KeyFetch`] if the JWKS endpoint cannot be reached
    /// - [`VerifyError::KeyParse`] if the key set has no usable key
    /// - [`VerifyError::Signature`] for malformed or badly signed tokens
    /// - [`VerifyError::Expired`] when `exp`/`nbf` fail after leeway
    /// - [`VerifyError::Claim`] when a claim does not match
    pub async fn verify_token(
        &self,
        token: &str,
        token_type: TokenType,
    ) -> Result<DecodedJwt, VerifyError> {
        let spec = self.config.claims_spec();
        self.verify_with_spec(token, &spec, token_type).await
    }

    async fn verify_with_spec(
        &self,
        token: &str,
        spec: &ClaimsValidationSpec,
        token_type: TokenType,
    ) -> Result<DecodedJwt, VerifyError> {
        let result = self.run_pipeline(token, spec, token_type).await;
        match &result {
            Ok(decoded) => {
                tracing::debug!(token_type = ?token_type, sub = ?decoded.subject(), "Token verified");
            }
            Err(e) => {
                tracing::warn!(token_type = ?token_type, error = %e, "Token rejected");
            }
        }
        result
    }

    async fn run_pipeline(
        &self,
        token: &str,
        spec: &ClaimsValidationSpec,
        token_type: TokenType,
    ) -> Result<DecodedJwt, VerifyError> {
        // Garbage input must not cost a network round trip.
        JwtParser::precheck(token)?;

        let keys = self.adaptor.get_keys(&self.jwks_url).await?;
        let decoded = match self.adaptor.decode(token, &keys, spec.leeway) {
            Err(VerifyError::Signature(SignatureError::NoMatchingKey(Some(kid)))) => {
                self.decode_after_refresh(token, kid, spec).await?
            }
            result => result?,
        };
        ClaimsValidator::validate(decoded.claims(), spec, token_type)?;
        Ok(decoded)
    }

    /// Retries a `kid` miss once against a refetched key set, if the adaptor
    /// agrees to refetch.
    async fn decode_after_refresh(
        &self,
        token: &str,
        kid: String,
        spec: &ClaimsValidationSpec,
    ) -> Result<DecodedJwt, VerifyError> {
        match self.adaptor.refresh_keys(&self.jwks_url).await? {
            Some(keys) => {
                tracing::info!(kid = %kid, "Unknown kid, retrying with refetched JWKS");
                self.adaptor.decode(token, &keys, spec.leeway)
            }
            None => Err(SignatureError::NoMatchingKey(Some(kid)).into()),
        }
    }

    /// Drops cached keys for this issuer; the next call refetches.
    pub async fn invalidate_keys(&self) {
        self.adaptor.invalidate(&self.jwks_url).await;
    }
}
