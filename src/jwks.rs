//! # JWKS (JSON Web Key Set) Retrieval Module
//!
//! Fetches a key set document over HTTP and normalizes it into raw JWK
//! records. Reconstruction of usable keys happens in [`crate::key`].
//!
//! ## Accepted document shapes
//! 1. `{"keys": [ {...}, {...} ]}`
//! 2. `[ {...}, {...} ]`
//! 3. `{...}` (a single key, no `keys` wrapper)
//!
//! Entries that are not JSON objects are skipped with a warning; the rest of
//! the document stays usable.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KeyFetchError;

/// Represents a JSON Web Key (JWK).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    #[serde(default)]
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// Algorithm hint (e.g., "RS256").
    pub alg: Option<String>,
    /// Key usage (e.g., "sig").
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url.
    pub n: Option<String>,
    /// RSA public exponent, base64url.
    pub e: Option<String>,
    /// RSA private exponent. Its presence disqualifies the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

// Key components stay out of logs.
impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("key_use", &self.key_use)
            .field("has_private_component", &self.d.is_some())
            .finish_non_exhaustive()
    }
}

/// Identifies a key within a set: its `kid`, or its position when the
/// document omits one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyId {
    Kid(String),
    Index(usize),
}

impl KeyId {
    pub fn kid(&self) -> Option<&str> {
        match self {
            Self::Kid(kid) => Some(kid),
            Self::Index(_) => None,
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kid(kid) => f.write_str(kid),
            Self::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// Raw JWK records from one document, in document order.
#[derive(Debug, Clone, Default)]
pub struct RawKeySet {
    pub keys: Vec<(KeyId, Jwk)>,
}

impl RawKeySet {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Normalizes any of the accepted document shapes into a [`RawKeySet`].
///
/// # Errors
///
/// [`KeyFetchError::Decode`] if the document is neither an object nor an
/// array, or if `keys` is present but not an array.
pub fn parse_key_set(document: Value) -> Result<RawKeySet, KeyFetchError> {
    let entries = match document {
        Value::Object(mut object) => match object.remove("keys") {
            Some(Value::Array(keys)) => keys,
            Some(_) => {
                return Err(KeyFetchError::Decode(
                    "`keys` member is not an array".to_string(),
                ))
            }
            None => vec![Value::Object(object)],
        },
        Value::Array(keys) => keys,
        _ => {
            return Err(KeyFetchError::Decode(
                "expected a JSON object or array".to_string(),
            ))
        }
    };

    let mut keys = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Jwk>(entry) {
            Ok(jwk) => {
                let id = match &jwk.kid {
                    Some(kid) => KeyId::Kid(kid.clone()),
                    None => KeyId::Index(index),
                };
                keys.push((id, jwk));
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping undecodable JWKS entry");
            }
        }
    }

    Ok(RawKeySet { keys })
}

/// Retrieves JWKS documents over HTTP.
#[derive(Debug, Clone)]
pub struct KeySetFetcher {
    client: reqwest::Client,
}

impl KeySetFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// [`KeyFetchError::ClientBuild`] if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, KeyFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| KeyFetchError::ClientBuild(e.to_string()))?;
        Ok(Self { client })
    }

    /// Uses a caller-provided client. The client's own timeout applies.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetches and parses the document at `jwks_url`.
    ///
    /// # Errors
    ///
    /// [`KeyFetchError`] on network failure, timeout, non-2xx status, or a
    /// body that is not a JSON key set.
    pub async fn fetch(&self, jwks_url: &str) -> Result<RawKeySet, KeyFetchError> {
        tracing::info!(jwks_url = %jwks_url, "Fetching JWKS");

        let response = self.client.get(jwks_url).send().await.map_err(|e| {
            let error = if e.is_timeout() {
                KeyFetchError::Timeout {
                    url: jwks_url.to_string(),
                }
            } else {
                KeyFetchError::Request {
                    url: jwks_url.to_string(),
                    reason: e.to_string(),
                }
            };
            tracing::error!(jwks_url = %jwks_url, error = %error, "JWKS request failed");
            error
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(jwks_url = %jwks_url, status = status.as_u16(), "JWKS endpoint returned an error status");
            return Err(KeyFetchError::Status {
                url: jwks_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                KeyFetchError::Timeout {
                    url: jwks_url.to_string(),
                }
            } else {
                KeyFetchError::Request {
                    url: jwks_url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let document: Value = serde_json::from_slice(&body).map_err(|e| {
            tracing::error!(jwks_url = %jwks_url, error = %e, "Failed to parse JWKS response");
            KeyFetchError::Decode(e.to_string())
        })?;

        let keys = parse_key_set(document)?;
        tracing::debug!(jwks_url = %jwks_url, keys = keys.len(), "Fetched JWKS");
        Ok(keys)
    }
}
