//! # JWT Parsing and Signature Verification Module
//!
//! Decodes compact JWTs and verifies them against a [`KeySet`].
//!
//! ## Features
//! - **Fast Rejection**: Structure, alphabet and header are checked before any
//!   signature work
//! - **Key Selection**: Uses the header's `kid` when present, otherwise tries
//!   every key in the set
//! - **Time Validation**: `exp` and `nbf` are checked with the caller's leeway
//!
//! ## Requirements
//! - Fixed RS256 algorithm

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, TokenData, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::claims::DecodedJwt;
use crate::error::{ExpiredTokenError, SignatureError, VerifyError};
use crate::key::{KeySet, PublicKey};

/// JWT Header structure.
///
/// Contains information from the JWT token header.
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Algorithm
    pub alg: String,
    /// Key ID
    pub kid: Option<String>,
    /// Token type
    pub typ: Option<String>,
}

/// JWT Parser.
///
/// Provides JWT token parsing and verification functionality.
pub struct JwtParser;

impl JwtParser {
    /// The only signing algorithm accepted.
    const SUPPORTED_ALGORITHM: &str = "RS256";

    /// Splits a compact token into its three segments, rejecting anything that
    /// is not `header.payload.signature` over the base64url alphabet.
    fn split(token: &str) -> Result<[&str; 3], SignatureError> {
        let parts: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = parts[..] else {
            return Err(SignatureError::Malformed(format!(
                "expected 3 segments, found {}",
                parts.len()
            )));
        };

        for (name, part) in [
            ("header", header),
            ("payload", payload),
            ("signature", signature),
        ] {
            if part.is_empty() {
                return Err(SignatureError::Malformed(format!("empty {name} segment")));
            }
            // Padding is tolerated, as some issuers emit it.
            if part
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '=')
            {
                tracing::warn!(segment = name, "JWT segment contains invalid characters");
                return Err(SignatureError::Malformed(format!(
                    "{name} segment is not base64url"
                )));
            }
        }

        Ok([header, payload, signature])
    }

    fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, SignatureError> {
        general_purpose::URL_SAFE_NO_PAD
            .decode(segment.trim_end_matches('='))
            .map_err(|e| SignatureError::Malformed(format!("{name} segment: {e}")))
    }

    /// Decodes the JWT header and checks that it names RS256.
    ///
    /// # Arguments
    ///
    /// * `token` - JWT token string
    pub fn decode_header(token: &str) -> Result<JwtHeader, SignatureError> {
        let [header, _, _] = Self::split(token)?;

        let header_bytes = Self::decode_segment("header", header)?;
        let header: JwtHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| SignatureError::Malformed(format!("header: {e}")))?;

        if header.alg != Self::SUPPORTED_ALGORITHM {
            tracing::warn!(
                alg = %header.alg,
                expected = Self::SUPPORTED_ALGORITHM,
                "Unsupported JWT algorithm"
            );
            return Err(SignatureError::UnsupportedAlgorithm(header.alg));
        }

        Ok(header)
    }

    /// Checks structure, header and payload encoding without touching any
    /// key. Cheap enough to run before fetching keys.
    ///
    /// # Errors
    ///
    /// [`SignatureError::Malformed`] or [`SignatureError::UnsupportedAlgorithm`].
    pub fn precheck(token: &str) -> Result<JwtHeader, SignatureError> {
        let header = Self::decode_header(token)?;
        Self::check_payload(token)?;
        Ok(header)
    }

    fn check_payload(token: &str) -> Result<(), SignatureError> {
        let [_, payload, _] = Self::split(token)?;
        let payload_bytes = Self::decode_segment("payload", payload)?;
        serde_json::from_slice::<Map<String, Value>>(&payload_bytes)
            .map_err(|e| SignatureError::Malformed(format!("payload: {e}")))?;
        Ok(())
    }

    /// Verifies `token` against `keys` and extracts its claims.
    ///
    /// # Arguments
    ///
    /// * `token` - JWT token string
    /// * `keys` - Candidate verification keys
    /// * `leeway` - Clock-skew tolerance for `exp`/`nbf`
    ///
    /// # Errors
    ///
    /// [`SignatureError`] for malformed tokens, unsupported algorithms, no
    /// matching key, or a signature that fails under every candidate;
    /// [`ExpiredTokenError`] when the time checks fail after leeway.
    pub fn decode(token: &str, keys: &KeySet, leeway: Duration) -> Result<DecodedJwt, VerifyError> {
        let header = Self::precheck(token)?;

        let validation = Self::validation(leeway);

        let token_data = match header.kid.as_deref() {
            Some(kid) => {
                let key = keys.find(kid).ok_or_else(|| {
                    tracing::warn!(kid, "Key with kid not found in JWKS");
                    SignatureError::NoMatchingKey(Some(kid.to_string()))
                })?;
                Self::verify_with_key(token, key, &validation)?
            }
            None => Self::verify_with_any_key(token, keys, &validation)?,
        };

        tracing::debug!(kid = ?header.kid, "JWT signature verified");
        Ok(DecodedJwt::new(
            token.to_string(),
            token_data.header,
            token_data.claims,
        ))
    }

    fn validation(leeway: Duration) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // Audience is checked by the claims pipeline.
        validation.validate_aud = false;
        validation.leeway = leeway.as_secs();
        validation
    }

    fn verify_with_key(
        token: &str,
        key: &PublicKey,
        validation: &Validation,
    ) -> Result<TokenData<Map<String, Value>>, VerifyError> {
        decode::<Map<String, Value>>(token, key.decoding_key(), validation).map_err(|e| {
            let error = Self::classify(e);
            tracing::warn!(error = %error, "JWT verification failed");
            error
        })
    }

    /// Tries each key in order. A signature mismatch moves on to the next key;
    /// any other failure means the signature already verified (or never will),
    /// so it is returned as is.
    fn verify_with_any_key(
        token: &str,
        keys: &KeySet,
        validation: &Validation,
    ) -> Result<TokenData<Map<String, Value>>, VerifyError> {
        if keys.is_empty() {
            return Err(SignatureError::NoMatchingKey(None).into());
        }

        for (id, key) in keys.iter() {
            match decode::<Map<String, Value>>(token, key.decoding_key(), validation) {
                Ok(data) => {
                    tracing::debug!(key = %id, "JWT verified by untagged key search");
                    return Ok(data);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => continue,
                Err(e) => return Err(Self::classify(e)),
            }
        }

        tracing::warn!(candidates = keys.len(), "JWT signature did not verify under any key");
        Err(SignatureError::InvalidSignature.into())
    }

    /// Maps a `jsonwebtoken` failure onto this crate's error kinds.
    fn classify(error: jsonwebtoken::errors::Error) -> VerifyError {
        match error.kind() {
            ErrorKind::ExpiredSignature => ExpiredTokenError::Expired.into(),
            ErrorKind::ImmatureSignature => ExpiredTokenError::NotYetValid.into(),
            ErrorKind::InvalidSignature => SignatureError::InvalidSignature.into(),
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                SignatureError::UnsupportedAlgorithm(error.to_string()).into()
            }
            ErrorKind::MissingRequiredClaim(claim) => {
                SignatureError::Malformed(format!("missing required claim `{claim}`")).into()
            }
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => SignatureError::Malformed(error.to_string()).into(),
            _ => SignatureError::InvalidSignature.into(),
        }
    }
}
