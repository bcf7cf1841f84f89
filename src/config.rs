//! Verifier configuration.
//!
//! [`VerifierSettings`] is the raw, host-supplied input. It is validated once
//! by [`VerifierConfig::from_settings`], which reports every violation at once
//! instead of failing on the first.

use std::time::Duration;

use serde::Deserialize;

use crate::claims::ClaimsValidationSpec;
use crate::error::{ConfigViolation, ConfigurationError};

/// Audience used when none is configured.
pub const DEFAULT_AUDIENCE: &str = "api://default";
/// Leeway used when none is configured (120 seconds).
pub const DEFAULT_LEEWAY: &str = "PT2M";
/// How long a fetched key set is served from cache.
pub const DEFAULT_JWKS_TTL_SECS: u64 = 24 * 3600;
/// Timeout for JWKS requests.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;
/// Minimum age of cached keys before an unknown `kid` triggers a refetch.
pub const DEFAULT_KEY_REFRESH_COOLDOWN_SECS: u64 = 60;

const ISSUER_PLACEHOLDER: &str = "{yourOktaDomain}";
const CLIENT_ID_PLACEHOLDER: &str = "{clientId}";
const JWKS_PATH: &str = "/oauth2/v1/keys";

/// Which metadata document the authorization server publishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discovery {
    /// `/.well-known/oauth-authorization-server`
    #[default]
    OAuth,
    /// `/.well-known/openid-configuration`
    Oidc,
}

impl Discovery {
    /// Well-known path of the metadata document, relative to the issuer.
    pub fn well_known_path(self) -> &'static str {
        match self {
            Self::OAuth => "/.well-known/oauth-authorization-server",
            Self::Oidc => "/.well-known/openid-configuration",
        }
    }
}

/// Raw settings as a host would load them from a file or the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    /// Base URL of the authorization server.
    pub issuer: String,
    /// Client id expected in access tokens' `cid` claim.
    pub client_id: String,
    /// Expected `aud`. Defaults to [`DEFAULT_AUDIENCE`].
    pub audience: Option<String>,
    /// Expected `nonce` for ID tokens.
    pub nonce: Option<String>,
    /// Clock-skew tolerance, e.g. `PT2M` or `90`. Defaults to [`DEFAULT_LEEWAY`].
    pub leeway: Option<String>,
    /// Defaults to [`DEFAULT_JWKS_TTL_SECS`].
    pub jwks_ttl_secs: Option<u64>,
    /// Defaults to [`DEFAULT_HTTP_TIMEOUT_SECS`].
    pub http_timeout_secs: Option<u64>,
    /// Defaults to [`DEFAULT_KEY_REFRESH_COOLDOWN_SECS`]. Zero refetches on
    /// every `kid` miss.
    pub key_refresh_cooldown_secs: Option<u64>,
    /// Metadata document flavor.
    pub discovery: Discovery,
    /// Also require `iss` to equal the configured issuer.
    pub validate_issuer: bool,
}

impl VerifierSettings {
    /// Settings with the two required fields filled in.
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

/// Validated, immutable verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    issuer: String,
    client_id: String,
    audience: String,
    nonce: Option<String>,
    leeway: Duration,
    jwks_ttl: Duration,
    http_timeout: Duration,
    key_refresh_cooldown: Duration,
    discovery: Discovery,
    validate_issuer: bool,
}

impl VerifierConfig {
    /// Validates `settings`, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] listing each problem found.
    pub fn from_settings(settings: VerifierSettings) -> Result<Self, ConfigurationError> {
        let mut violations = Vec::new();

        let issuer = settings.issuer.trim().trim_end_matches('/').to_string();
        if issuer.is_empty() {
            violations.push(ConfigViolation::MissingIssuer);
        } else if issuer.contains(ISSUER_PLACEHOLDER) {
            violations.push(ConfigViolation::PlaceholderIssuer);
        } else if !is_secure_issuer(&issuer) {
            violations.push(ConfigViolation::InsecureIssuer(issuer.clone()));
        }

        let client_id = settings.client_id.trim().to_string();
        if client_id.is_empty() {
            violations.push(ConfigViolation::MissingClientId);
        } else if client_id.contains(CLIENT_ID_PLACEHOLDER) {
            violations.push(ConfigViolation::PlaceholderClientId);
        }

        let leeway_text = settings.leeway.as_deref().unwrap_or(DEFAULT_LEEWAY);
        let leeway = match parse_duration(leeway_text) {
            Some(leeway) => leeway,
            None => {
                violations.push(ConfigViolation::InvalidLeeway(leeway_text.to_string()));
                Duration::ZERO
            }
        };

        let jwks_ttl_secs = settings.jwks_ttl_secs.unwrap_or(DEFAULT_JWKS_TTL_SECS);
        if jwks_ttl_secs == 0 {
            violations.push(ConfigViolation::ZeroTtl);
        }
        let http_timeout_secs = settings
            .http_timeout_secs
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if http_timeout_secs == 0 {
            violations.push(ConfigViolation::ZeroTimeout);
        }

        if !violations.is_empty() {
            return Err(ConfigurationError { violations });
        }

        Ok(Self {
            issuer,
            client_id,
            audience: settings
                .audience
                .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string()),
            nonce: settings.nonce,
            leeway,
            jwks_ttl: Duration::from_secs(jwks_ttl_secs),
            http_timeout: Duration::from_secs(http_timeout_secs),
            key_refresh_cooldown: Duration::from_secs(
                settings
                    .key_refresh_cooldown_secs
                    .unwrap_or(DEFAULT_KEY_REFRESH_COOLDOWN_SECS),
            ),
            discovery: settings.discovery,
            validate_issuer: settings.validate_issuer,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    pub fn jwks_ttl(&self) -> Duration {
        self.jwks_ttl
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn key_refresh_cooldown(&self) -> Duration {
        self.key_refresh_cooldown
    }

    pub fn discovery(&self) -> Discovery {
        self.discovery
    }

    /// `{issuer}/oauth2/v1/keys`
    pub fn jwks_url(&self) -> String {
        format!("{}{JWKS_PATH}", self.issuer)
    }

    /// URL of the discovery metadata document for the configured flavor.
    pub fn metadata_url(&self) -> String {
        format!("{}{}", self.issuer, self.discovery.well_known_path())
    }

    /// Claim expectations derived from this configuration.
    pub fn claims_spec(&self) -> ClaimsValidationSpec {
        ClaimsValidationSpec {
            audience: Some(self.audience.clone()),
            client_id: Some(self.client_id.clone()),
            nonce: self.nonce.clone(),
            issuer: self.validate_issuer.then(|| self.issuer.clone()),
            leeway: self.leeway,
        }
    }
}

/// Plain `http://` is only tolerated for loopback hosts.
fn is_secure_issuer(issuer: &str) -> bool {
    if issuer.starts_with("https://") {
        return true;
    }
    match issuer.strip_prefix("http://") {
        Some(rest) => {
            let host = rest.split(['/', ':']).next().unwrap_or_default();
            host == "localhost" || host == "127.0.0.1"
        }
        None => false,
    }
}

/// Parses an ISO-8601 time duration (`PT1H2M3S`, `PT2M`, `PT90S`) or a bare
/// number of seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let body = input.strip_prefix("PT")?;
    if body.is_empty() {
        return None;
    }

    let mut total = 0u64;
    let mut digits = String::new();
    let mut last_unit = 0u8;
    for c in body.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let (rank, factor) = match c {
            'H' => (1, 3600),
            'M' => (2, 60),
            'S' => (3, 1),
            _ => return None,
        };
        // Units must appear at most once, in H, M, S order.
        if digits.is_empty() || rank <= last_unit {
            return None;
        }
        let value: u64 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(factor)?)?;
        digits.clear();
        last_unit = rank;
    }

    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}
