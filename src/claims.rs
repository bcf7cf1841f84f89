//! # Claims and Claim Validation
//!
//! [`DecodedJwt`] is the verified token handed back to callers.
//! [`ClaimsValidator`] checks its claims against a [`ClaimsValidationSpec`],
//! with a different sequence of checks per [`TokenType`]:
//!
//! - `Id`: audience, then nonce
//! - `Access`: audience, then client id
//!
//! Each check follows the same rule: a claim that is absent from the token
//! *and* has no expectation passes; any other disagreement (absent on one
//! side, or present with a different value) fails.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::Header;
use serde_json::{Map, Value};

use crate::error::ClaimValidationError;

/// Which pipeline to run after the signature checks out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    /// OIDC ID token.
    Id,
    /// OAuth2 access token.
    #[default]
    Access,
}

/// Caller-supplied expectations for claim values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsValidationSpec {
    pub audience: Option<String>,
    pub client_id: Option<String>,
    /// Only checked for ID tokens.
    pub nonce: Option<String>,
    /// Opt-in `iss` check, run for both token types.
    pub issuer: Option<String>,
    /// Clock-skew tolerance for `exp` and `nbf`.
    pub leeway: Duration,
}

impl Default for ClaimsValidationSpec {
    fn default() -> Self {
        Self {
            audience: None,
            client_id: None,
            nonce: None,
            issuer: None,
            leeway: Duration::from_secs(120),
        }
    }
}

/// A verified JWT. Immutable after construction.
#[derive(Clone)]
pub struct DecodedJwt {
    token: String,
    header: Header,
    claims: Map<String, Value>,
}

impl DecodedJwt {
    pub(crate) fn new(token: String, header: Header, claims: Map<String, Value>) -> Self {
        Self {
            token,
            header,
            claims,
        }
    }

    /// The compact token this was decoded from.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn into_claims(self) -> Map<String, Value> {
        self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// A claim's value if it is a JSON string.
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.string_claim("iss")
    }

    pub fn subject(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    pub fn client_id(&self) -> Option<&str> {
        self.string_claim("cid")
    }

    pub fn nonce(&self) -> Option<&str> {
        self.string_claim("nonce")
    }

    /// `aud` as a list, whether it was encoded as a string or an array.
    pub fn audience(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// `exp` in seconds since the epoch.
    pub fn expires_at(&self) -> Option<u64> {
        self.claims.get("exp").and_then(Value::as_u64)
    }

    /// `iat` in seconds since the epoch.
    pub fn issued_at(&self) -> Option<u64> {
        self.claims.get("iat").and_then(Value::as_u64)
    }
}

// The raw token stays out of `Debug` output.
impl fmt::Debug for DecodedJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedJwt")
            .field("header", &self.header)
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

/// Runs the per-token-type claim checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsValidator;

impl ClaimsValidator {
    /// Validates `claims` against `spec` for the given token type.
    ///
    /// # Errors
    ///
    /// The first failing check, as a [`ClaimValidationError`] naming its claim.
    pub fn validate(
        claims: &Map<String, Value>,
        spec: &ClaimsValidationSpec,
        token_type: TokenType,
    ) -> Result<(), ClaimValidationError> {
        if spec.issuer.is_some() {
            Self::validate_issuer(claims, spec.issuer.as_deref())?;
        }

        match token_type {
            TokenType::Id => {
                Self::validate_audience(claims, spec.audience.as_deref())?;
                Self::validate_nonce(claims, spec.nonce.as_deref())?;
            }
            TokenType::Access => {
                Self::validate_audience(claims, spec.audience.as_deref())?;
                Self::validate_client_id(claims, spec.client_id.as_deref())?;
            }
        }
        Ok(())
    }

    /// `aud` may be a string (must equal) or an array (must contain).
    pub fn validate_audience(
        claims: &Map<String, Value>,
        expected: Option<&str>,
    ) -> Result<(), ClaimValidationError> {
        let mismatch = |actual: Option<String>| ClaimValidationError::Audience {
            expected: expected.map(str::to_string),
            actual,
        };

        match (claims.get("aud"), expected) {
            (None | Some(Value::Null), None) => Ok(()),
            (Some(Value::String(aud)), Some(expected)) if aud == expected => Ok(()),
            (Some(Value::Array(items)), Some(expected))
                if items.iter().any(|item| item.as_str() == Some(expected)) =>
            {
                Ok(())
            }
            (actual, _) => Err(mismatch(actual.and_then(render_claim))),
        }
    }

    pub fn validate_client_id(
        claims: &Map<String, Value>,
        expected: Option<&str>,
    ) -> Result<(), ClaimValidationError> {
        match_string_claim(claims, "cid", expected).map_err(|actual| {
            ClaimValidationError::ClientId {
                expected: expected.map(str::to_string),
                actual,
            }
        })
    }

    pub fn validate_nonce(
        claims: &Map<String, Value>,
        expected: Option<&str>,
    ) -> Result<(), ClaimValidationError> {
        match_string_claim(claims, "nonce", expected).map_err(|actual| {
            ClaimValidationError::Nonce {
                expected: expected.map(str::to_string),
                actual,
            }
        })
    }

    pub fn validate_issuer(
        claims: &Map<String, Value>,
        expected: Option<&str>,
    ) -> Result<(), ClaimValidationError> {
        match_string_claim(claims, "iss", expected).map_err(|actual| {
            ClaimValidationError::Issuer {
                expected: expected.map(str::to_string),
                actual,
            }
        })
    }
}

/// `Ok` when both sides are absent or both hold the same string; otherwise
/// the rendered actual value.
fn match_string_claim(
    claims: &Map<String, Value>,
    name: &str,
    expected: Option<&str>,
) -> Result<(), Option<String>> {
    let actual = claims.get(name).filter(|value| !value.is_null());
    match (actual, expected) {
        (None, None) => Ok(()),
        (Some(Value::String(actual)), Some(expected)) if actual == expected => Ok(()),
        (actual, _) => Err(actual.and_then(render_claim)),
    }
}

fn render_claim(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
