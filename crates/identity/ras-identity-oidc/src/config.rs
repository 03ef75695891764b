//! OIDC client configuration.

use crate::error::{OidcError, OidcResult};
use chrono::Duration;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::str::FromStr;
use url::Url;

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Longest accepted lifetime for sessions, pending logins and cached metadata.
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Convert a configured lifetime into a timestamp offset.
///
/// Fails with [`OidcError::Configuration`] above [`MAX_TTL_SECONDS`].
pub fn ttl_from_seconds(name: &str, seconds: u64) -> OidcResult<Duration> {
    i64::try_from(seconds)
        .ok()
        .filter(|_| seconds <= MAX_TTL_SECONDS)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            OidcError::Configuration(format!(
                "{name} must be at most {MAX_TTL_SECONDS} seconds, got {seconds}"
            ))
        })
}

/// How ID token signatures are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    /// Always expect this algorithm, whatever the provider advertises.
    Pinned(Algorithm),
    /// Use the first algorithm listed in the provider's discovery document.
    Advertised,
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        Self::Pinned(Algorithm::HS256)
    }
}

impl FromStr for SigningAlgorithm {
    type Err = OidcError;

    fn from_str(value: &str) -> OidcResult<Self> {
        if value.eq_ignore_ascii_case("auto") || value.eq_ignore_ascii_case("advertised") {
            return Ok(Self::Advertised);
        }
        Algorithm::from_str(value)
            .or_else(|_| Algorithm::from_str(&value.to_ascii_uppercase()))
            .map(Self::Pinned)
            .map_err(|_| {
                OidcError::Configuration(format!("unsupported ID token signing algorithm '{value}'"))
            })
    }
}

/// Settings for one relying party registered at one issuer.
#[derive(Clone)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    pub signing_algorithm: SigningAlgorithm,
    pub http_timeout_seconds: u64,
    pub discovery_ttl_seconds: u64,
    /// How long a started login may wait for its callback.
    pub pending_login_ttl_seconds: u64,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scopes", &self.scopes)
            .field("signing_algorithm", &self.signing_algorithm)
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .field("discovery_ttl_seconds", &self.discovery_ttl_seconds)
            .field("pending_login_ttl_seconds", &self.pending_login_ttl_seconds)
            .finish()
    }
}

impl OidcConfig {
    /// Validates the required settings. Fails with [`OidcError::Configuration`]
    /// so that a misconfigured service refuses to start.
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: &str,
    ) -> OidcResult<Self> {
        let issuer_url = required("issuer_url", issuer_url.into())?;
        let client_id = required("client_id", client_id.into())?;
        let client_secret = required("client_secret", client_secret.into())?;

        Url::parse(&issuer_url)
            .map_err(|e| OidcError::Configuration(format!("issuer_url is not a URL: {e}")))?;
        let redirect_uri = Url::parse(redirect_uri)
            .map_err(|e| OidcError::Configuration(format!("redirect_uri is not a URL: {e}")))?;

        Ok(Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: vec!["openid".to_string()],
            signing_algorithm: SigningAlgorithm::default(),
            http_timeout_seconds: 10,
            discovery_ttl_seconds: 3600, // 1 hour
            pending_login_ttl_seconds: 600, // 10 minutes
        })
    }

    /// Adds scopes on top of `openid`, which is always requested.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scope in scopes {
            let scope = scope.into();
            if !self.scopes.contains(&scope) {
                self.scopes.push(scope);
            }
        }
        self
    }

    pub fn with_signing_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.signing_algorithm = algorithm;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_discovery_ttl(mut self, seconds: u64) -> Self {
        self.discovery_ttl_seconds = seconds;
        self
    }

    pub fn with_pending_login_ttl(mut self, seconds: u64) -> Self {
        self.pending_login_ttl_seconds = seconds;
        self
    }

    /// Location of the provider's discovery document.
    ///
    /// An issuer URL that already names the well-known document is used verbatim.
    pub fn discovery_url(&self) -> String {
        if self.issuer_url.trim_end_matches('/').ends_with(WELL_KNOWN_PATH) {
            self.issuer_url.clone()
        } else {
            format!("{}/{}", self.issuer_url.trim_end_matches('/'), WELL_KNOWN_PATH)
        }
    }

    /// Issuer expected in ID tokens when discovery does not name one.
    pub fn expected_issuer(&self) -> &str {
        self.issuer_url
            .trim_end_matches('/')
            .trim_end_matches(WELL_KNOWN_PATH)
            .trim_end_matches('/')
    }

    /// Discovery cache lifetime. Zero disables caching.
    pub fn discovery_ttl(&self) -> OidcResult<Duration> {
        ttl_from_seconds("discovery_ttl_seconds", self.discovery_ttl_seconds)
    }

    pub fn pending_login_ttl(&self) -> OidcResult<Duration> {
        if self.pending_login_ttl_seconds == 0 {
            return Err(OidcError::Configuration(
                "pending_login_ttl_seconds must be positive".to_string(),
            ));
        }
        ttl_from_seconds("pending_login_ttl_seconds", self.pending_login_ttl_seconds)
    }

    /// Path component of the redirect URI, which marks callback requests.
    pub fn callback_path(&self) -> &str {
        self.redirect_uri.path()
    }
}

fn required(name: &str, value: String) -> OidcResult<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(OidcError::Configuration(format!("{name} is required")));
    }
    Ok(value)
}
