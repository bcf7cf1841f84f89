//! Defines the error types that can occur while verifying a JWT.
//!
//! Each stage of the pipeline has its own error kind so callers can branch on
//! what went wrong instead of matching on strings. [`VerifyError`] wraps the
//! runtime kinds and is what every `verify*` call returns.
//!
//! None of the `Display` texts include raw tokens or key material, so they are
//! safe to log.

use thiserror::Error;

/// A single problem found while validating [`crate::VerifierSettings`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    /// No issuer was provided.
    #[error("issuer is required")]
    MissingIssuer,

    /// The issuer still contains the documentation placeholder.
    #[error("issuer contains the `{{yourOktaDomain}}` placeholder")]
    PlaceholderIssuer,

    /// The issuer does not use HTTPS.
    #[error("issuer must use https: {0}")]
    InsecureIssuer(String),

    /// No client id was provided.
    #[error("client id is required")]
    MissingClientId,

    /// The client id still contains the documentation placeholder.
    #[error("client id contains the `{{clientId}}` placeholder")]
    PlaceholderClientId,

    /// The leeway could not be parsed as a duration.
    #[error("leeway is not a valid duration: {0}")]
    InvalidLeeway(String),

    /// The JWKS time-to-live is zero.
    #[error("JWKS cache TTL must be greater than zero")]
    ZeroTtl,

    /// The HTTP timeout is zero.
    #[error("HTTP timeout must be greater than zero")]
    ZeroTimeout,
}

/// Raised when building a [`crate::VerifierConfig`]. Lists every violation
/// found, not only the first.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid verifier configuration: {}", join_violations(.violations))]
pub struct ConfigurationError {
    /// All violations, in the order they were checked.
    pub violations: Vec<ConfigViolation>,
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure to retrieve a JWKS document. Callers may retry with backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyFetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// The request did not complete within the configured timeout.
    #[error("timed out fetching JWKS from {url}")]
    Timeout {
        /// JWKS endpoint.
        url: String,
    },

    /// A network-level failure occurred.
    #[error("failed to fetch JWKS from {url}: {reason}")]
    Request {
        /// JWKS endpoint.
        url: String,
        /// Underlying transport error.
        reason: String,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("JWKS endpoint {url} returned status {status}")]
    Status {
        /// JWKS endpoint.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body was not a JSON key set.
    #[error("failed to decode JWKS response: {0}")]
    Decode(String),
}

/// A JWK could not be turned into a usable public key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// Only RSA keys are supported.
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// A required RSA component is absent.
    #[error("missing key component `{0}`")]
    MissingComponent(&'static str),

    /// The JWK carries a private exponent and must not be used.
    #[error("JWK contains private key material")]
    PrivateKey,

    /// A component is not valid base64url.
    #[error("base64 decode error in `{component}`: {reason}")]
    Base64 {
        /// The component that failed (`n` or `e`).
        component: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// The crypto library rejected the constructed key.
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// A fetched key set contained no usable key.
    #[error("JWKS at {url} contains no usable keys")]
    NoUsableKeys {
        /// JWKS endpoint.
        url: String,
    },
}

/// The token is malformed or its signature does not verify.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The compact serialization could not be decoded.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The header names an algorithm other than RS256.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// No key in the set matches the token.
    #[error("no matching key{}", kid_suffix(.0))]
    NoMatchingKey(Option<String>),

    /// The signature did not verify under any candidate key.
    #[error("token signature verification failed")]
    InvalidSignature,
}

fn kid_suffix(kid: &Option<String>) -> String {
    kid.as_deref()
        .map(|kid| format!(" for kid '{kid}'"))
        .unwrap_or_default()
}

/// A claim does not match the caller's expectation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimValidationError {
    /// `aud` does not match the expected audience.
    #[error("claim `aud` does not match the expected audience")]
    Audience {
        /// Configured audience.
        expected: Option<String>,
        /// Audience found in the token, if any.
        actual: Option<String>,
    },

    /// `cid` does not match the expected client id.
    #[error("claim `cid` does not match the expected client id")]
    ClientId {
        /// Configured client id.
        expected: Option<String>,
        /// Client id found in the token, if any.
        actual: Option<String>,
    },

    /// `nonce` does not match the expected nonce.
    #[error("claim `nonce` does not match the expected nonce")]
    Nonce {
        /// Expected nonce.
        expected: Option<String>,
        /// Nonce found in the token, if any.
        actual: Option<String>,
    },

    /// `iss` does not match the expected issuer.
    #[error("claim `iss` does not match the expected issuer")]
    Issuer {
        /// Configured issuer.
        expected: Option<String>,
        /// Issuer found in the token, if any.
        actual: Option<String>,
    },
}

impl ClaimValidationError {
    /// Name of the JWT claim that failed.
    pub fn claim(&self) -> &'static str {
        match self {
            Self::Audience { .. } => "aud",
            Self::ClientId { .. } => "cid",
            Self::Nonce { .. } => "nonce",
            Self::Issuer { .. } => "iss",
        }
    }
}

/// Time-based validity failed even after applying leeway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpiredTokenError {
    /// `exp` is in the past.
    #[error("token has expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("token is not yet valid")]
    NotYetValid,
}

/// Error returned by every `verify*` operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// See [`KeyFetchError`].
    #[error(transparent)]
    KeyFetch(#[from] KeyFetchError),

    /// See [`KeyParseError`].
    #[error(transparent)]
    KeyParse(#[from] KeyParseError),

    /// See [`SignatureError`].
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// See [`ClaimValidationError`].
    #[error(transparent)]
    Claim(#[from] ClaimValidationError),

    /// See [`ExpiredTokenError`].
    #[error(transparent)]
    Expired(#[from] ExpiredTokenError),
}

impl VerifyError {
    /// Whether retrying the same call later could succeed.
    ///
    /// Only transport failures qualify; everything else is a property of the
    /// token or the published keys.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyFetch(_))
    }
}
