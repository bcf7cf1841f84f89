//! Claim pipeline tests.
//!
//! ## Test focus
//! - **Per-type sequences**: ID tokens check audience then nonce, access
//!   tokens check audience then client id
//! - **Absent/absent rule**: a claim missing on both sides passes, a claim
//!   present on only one side fails
//! - **Audience forms**: string and array `aud`
//! - **Opt-in issuer check**
//! - **Accessors** on the decoded token

use std::time::Duration;

use serde_json::Map;

use super::test_helpers::*;
use crate::{
    ClaimValidationError, ClaimsValidationSpec, ClaimsValidator, JwtParser, KeySet, TokenType,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_of(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn access_spec() -> ClaimsValidationSpec {
        ClaimsValidationSpec {
            audience: Some(TEST_AUDIENCE.to_string()),
            client_id: Some(TEST_CLIENT_ID.to_string()),
            ..ClaimsValidationSpec::default()
        }
    }

    fn id_spec(nonce: Option<&str>) -> ClaimsValidationSpec {
        ClaimsValidationSpec {
            nonce: nonce.map(str::to_string),
            ..access_spec()
        }
    }

    // ==================== Access tokens ====================

    #[test]
    fn test_access_token_passes() {
        let claims = claims_of(access_claims());
        assert_eq!(
            ClaimsValidator::validate(&claims, &access_spec(), TokenType::Access),
            Ok(())
        );
    }

    #[test]
    fn test_access_audience_mismatch() {
        let mut claims = claims_of(access_claims());
        claims.insert("aud".into(), json!("api://other"));

        let err = ClaimsValidator::validate(&claims, &access_spec(), TokenType::Access)
            .expect_err("aud mismatch");
        assert_eq!(err.claim(), "aud");
        assert_eq!(
            err,
            ClaimValidationError::Audience {
                expected: Some(TEST_AUDIENCE.to_string()),
                actual: Some("api://other".to_string()),
            }
        );
    }

    #[test]
    fn test_access_client_id_mismatch() {
        let mut claims = claims_of(access_claims());
        claims.insert("cid".into(), json!("0oaY"));

        let err = ClaimsValidator::validate(&claims, &access_spec(), TokenType::Access)
            .expect_err("cid mismatch");
        assert_eq!(err.claim(), "cid");
    }

    #[test]
    fn test_audience_checked_before_client_id() {
        let mut claims = claims_of(access_claims());
        claims.insert("aud".into(), json!("api://other"));
        claims.insert("cid".into(), json!("0oaY"));

        let err = ClaimsValidator::validate(&claims, &access_spec(), TokenType::Access)
            .expect_err("both wrong");
        assert_eq!(err.claim(), "aud");
    }

    #[test]
    fn test_access_token_ignores_nonce() {
        let mut claims = claims_of(access_claims());
        claims.insert("nonce".into(), json!("anything"));

        assert!(ClaimsValidator::validate(&claims, &access_spec(), TokenType::Access).is_ok());
    }

    // ==================== ID tokens ====================

    #[test]
    fn test_id_token_with_matching_nonce() {
        let claims = claims_of(id_claims(Some(TEST_NONCE)));
        assert!(
            ClaimsValidator::validate(&claims, &id_spec(Some(TEST_NONCE)), TokenType::Id).is_ok()
        );
    }

    #[test]
    fn test_id_token_missing_expected_nonce() {
        let claims = claims_of(id_claims(None));

        let err = ClaimsValidator::validate(&claims, &id_spec(Some(TEST_NONCE)), TokenType::Id)
            .expect_err("nonce required");
        assert_eq!(err.claim(), "nonce");
        assert_eq!(
            err,
            ClaimValidationError::Nonce {
                expected: Some(TEST_NONCE.to_string()),
                actual: None,
            }
        );
    }

    #[test]
    fn test_id_token_wrong_nonce() {
        let claims = claims_of(id_claims(Some("replayed")));

        let err = ClaimsValidator::validate(&claims, &id_spec(Some(TEST_NONCE)), TokenType::Id)
            .expect_err("nonce mismatch");
        assert_eq!(err.claim(), "nonce");
    }

    #[test]
    fn test_id_token_without_nonce_on_either_side() {
        let claims = claims_of(id_claims(None));
        assert!(ClaimsValidator::validate(&claims, &id_spec(None), TokenType::Id).is_ok());
    }

    #[test]
    fn test_unexpected_nonce_fails() {
        // Present in the token but not expected.
        let claims = claims_of(id_claims(Some(TEST_NONCE)));

        let err = ClaimsValidator::validate(&claims, &id_spec(None), TokenType::Id)
            .expect_err("unexpected nonce");
        assert_eq!(
            err,
            ClaimValidationError::Nonce {
                expected: None,
                actual: Some(TEST_NONCE.to_string()),
            }
        );
    }

    #[test]
    fn test_id_token_ignores_client_id() {
        let mut claims = claims_of(id_claims(None));
        claims.insert("cid".into(), json!("someone-else"));

        assert!(ClaimsValidator::validate(&claims, &id_spec(None), TokenType::Id).is_ok());
    }

    // ==================== Matching rules ====================

    #[test]
    fn test_absent_on_both_sides_passes() {
        let claims = Map::new();
        assert!(ClaimsValidator::validate_audience(&claims, None).is_ok());
        assert!(ClaimsValidator::validate_client_id(&claims, None).is_ok());
        assert!(ClaimsValidator::validate_nonce(&claims, None).is_ok());
    }

    #[test]
    fn test_null_counts_as_absent() {
        let claims = claims_of(json!({ "cid": null, "aud": null }));
        assert!(ClaimsValidator::validate_client_id(&claims, None).is_ok());
        assert!(ClaimsValidator::validate_audience(&claims, None).is_ok());
    }

    #[test]
    fn test_claim_present_but_unconfigured_fails() {
        let claims = claims_of(access_claims());
        assert!(ClaimsValidator::validate_client_id(&claims, None).is_err());
        assert!(ClaimsValidator::validate_audience(&claims, None).is_err());
    }

    #[test]
    fn test_non_string_claim_rendered() {
        let claims = claims_of(json!({ "cid": 42 }));
        assert_eq!(
            ClaimsValidator::validate_client_id(&claims, Some("42")),
            Err(ClaimValidationError::ClientId {
                expected: Some("42".to_string()),
                actual: Some("42".to_string()),
            })
        );
    }

    #[test]
    fn test_audience_array_must_contain_expected() {
        let claims = claims_of(json!({ "aud": ["api://orders", TEST_AUDIENCE] }));
        assert!(ClaimsValidator::validate_audience(&claims, Some(TEST_AUDIENCE)).is_ok());

        let err = ClaimsValidator::validate_audience(&claims, Some("api://billing"))
            .expect_err("not a member");
        assert_eq!(
            err,
            ClaimValidationError::Audience {
                expected: Some("api://billing".to_string()),
                actual: Some(format!("[\"api://orders\",\"{TEST_AUDIENCE}\"]")),
            }
        );
    }

    #[test]
    fn test_audience_is_case_sensitive() {
        let claims = claims_of(json!({ "aud": "API://DEFAULT" }));
        assert!(ClaimsValidator::validate_audience(&claims, Some(TEST_AUDIENCE)).is_err());
    }

    // ==================== Issuer ====================

    #[test]
    fn test_issuer_not_checked_by_default() {
        let mut claims = claims_of(access_claims());
        claims.insert("iss".into(), json!("https://elsewhere.example.com"));

        assert!(ClaimsValidator::validate(&claims, &access_spec(), TokenType::Access).is_ok());
    }

    #[test]
    fn test_issuer_checked_first_when_configured() {
        let spec = ClaimsValidationSpec {
            issuer: Some("https://dev-123.okta.com".to_string()),
            ..access_spec()
        };

        let mut claims = claims_of(access_claims());
        claims.insert("iss".into(), json!("https://dev-123.okta.com"));
        assert!(ClaimsValidator::validate(&claims, &spec, TokenType::Access).is_ok());

        claims.insert("iss".into(), json!("https://elsewhere.example.com"));
        claims.insert("aud".into(), json!("api://other"));
        let err = ClaimsValidator::validate(&claims, &spec, TokenType::Access)
            .expect_err("issuer mismatch");
        assert_eq!(err.claim(), "iss");
    }

    #[test]
    fn test_default_spec_leeway() {
        assert_eq!(
            ClaimsValidationSpec::default().leeway,
            Duration::from_secs(120)
        );
    }

    // ==================== Decoded token accessors ====================

    #[test]
    fn test_decoded_jwt_accessors() {
        let mut claims = access_claims();
        claims["iss"] = json!("https://dev-123.okta.com");
        claims["aud"] = json!(["api://orders", TEST_AUDIENCE]);
        let token = sign(&PRIMARY_KEY, Some(TEST_KID), &claims);
        let keys: KeySet = key_set(&[(&PRIMARY_KEY, TEST_KID)]);

        let decoded = JwtParser::decode(&token, &keys, Duration::from_secs(120)).expect("valid");

        assert_eq!(decoded.subject(), Some(TEST_SUBJECT));
        assert_eq!(decoded.client_id(), Some(TEST_CLIENT_ID));
        assert_eq!(decoded.issuer(), Some("https://dev-123.okta.com"));
        assert_eq!(decoded.nonce(), None);
        assert_eq!(decoded.audience(), vec!["api://orders", TEST_AUDIENCE]);
        assert_eq!(decoded.expires_at(), claims["exp"].as_u64());
        assert_eq!(decoded.issued_at(), claims["iat"].as_u64());
        assert_eq!(decoded.string_claim("exp"), None);
        assert_eq!(decoded.claim("cid"), Some(&json!(TEST_CLIENT_ID)));
    }

    #[test]
    fn test_decoded_jwt_debug_omits_token() {
        let token = sign(&PRIMARY_KEY, Some(TEST_KID), &access_claims());
        let keys = key_set(&[(&PRIMARY_KEY, TEST_KID)]);
        let decoded = JwtParser::decode(&token, &keys, Duration::from_secs(120)).expect("valid");

        let rendered = format!("{decoded:?}");
        assert!(rendered.contains(TEST_SUBJECT));
        assert!(!rendered.contains(&token));

        let claims = decoded.into_claims();
        assert_eq!(claims.get("sub"), Some(&json!(TEST_SUBJECT)));
    }
}
