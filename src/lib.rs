//! # jwks-verifier
//!
//! Verifies JWTs issued by an OAuth2/OIDC authorization server against the
//! public keys it publishes at its JWKS endpoint.
//!
//! ## Features
//! - **Key Reconstruction**: RSA JWKs are rebuilt into X.509 public keys
//! - **JWKS Caching**: Key sets are cached per endpoint with a TTL, and
//!   concurrent cold lookups share a single fetch
//! - **Typed Failures**: Every stage reports its own error kind
//! - **Token Types**: ID tokens check audience and nonce; access tokens check
//!   audience and client id
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jwks_verifier::{KeyCache, Verifier, VerifierConfig, VerifierSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. Validate configuration once at startup
//!     let settings = VerifierSettings::new("https://dev-123.okta.com", "0oa1b2c3d4");
//!     let config = VerifierConfig::from_settings(settings)?;
//!
//!     // 2. One cache per process, shared by every verifier
//!     let cache = Arc::new(KeyCache::new());
//!     let verifier = Verifier::with_cache(config, cache)?;
//!
//!     // 3. Verify a bearer token (already stripped of its `Bearer ` prefix)
//!     let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6Ii4uLiJ9...";
//!     match verifier.verify_access_token(token).await {
//!         Ok(jwt) => println!("token for subject {:?}", jwt.subject()),
//!         Err(e) => eprintln!("unauthorized: {e}"),
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Key retrieval and decoding capability.
mod adaptor;
/// JWKS cache with single-flight fetches.
mod cache;
/// Decoded tokens and claim validation.
mod claims;
/// Validated verifier configuration.
mod config;
/// Defines error types for the library.
mod error;
/// JWKS document retrieval.
mod jwks;
/// RSA public key reconstruction.
mod key;
/// Provides JWT parsing and signature verification.
mod parser;
/// Verification pipeline.
mod verifier;


pub use adaptor::{reconstruct_all, Adaptor, JwtAdaptor};
pub use cache::{CachedKeySet, KeyCache};
pub use claims::{ClaimsValidationSpec, ClaimsValidator, DecodedJwt, TokenType};
pub use config::{
    parse_duration, Discovery, VerifierConfig, VerifierSettings, DEFAULT_AUDIENCE,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_JWKS_TTL_SECS, DEFAULT_KEY_REFRESH_COOLDOWN_SECS,
    DEFAULT_LEEWAY,
};
pub use error::{
    ClaimValidationError, ConfigViolation, ConfigurationError, ExpiredTokenError, KeyFetchError,
    KeyParseError, SignatureError, VerifyError,
};
pub use jwks::{parse_key_set, Jwk, KeyId, KeySetFetcher, RawKeySet};
pub use key::{reconstruct, rsa_public_key_pem, subject_public_key_info, KeySet, PublicKey};
pub use parser::{JwtHeader, JwtParser};
pub use verifier::Verifier;
