//! Command line and environment configuration.

use anyhow::{Context, Result};
use axum_extra::extract::cookie::{Cookie, SameSite};
use clap::Parser;
use ras_identity_oidc::{MAX_TTL_SECONDS, OidcConfig, SessionId, SigningAlgorithm};

pub const DEFAULT_COOKIE_NAME: &str = "SESSION";

#[derive(Debug, Clone, Parser)]
#[command(name = "ras-oidc-server", version, about = "OpenID Connect login in front of a demo app")]
pub struct ServerConfig {
    /// Issuer URL, or the full URL of its discovery document
    #[arg(long, env = "OIDC_ISSUER_URL")]
    pub issuer_url: String,

    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub client_id: String,

    #[arg(long, env = "OIDC_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Registered redirect URI; its path is served as the callback
    #[arg(long, env = "OIDC_REDIRECT_URI")]
    pub redirect_uri: String,

    /// ID token algorithm such as HS256 or RS256, or `auto` to follow discovery
    #[arg(long, env = "OIDC_ID_TOKEN_SIGNING_ALG", default_value = "HS256")]
    pub id_token_signing_alg: String,

    #[arg(long, env = "OIDC_HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,

    #[arg(long, env = "SESSION_COOKIE_NAME", default_value = DEFAULT_COOKIE_NAME)]
    pub session_cookie_name: String,

    /// Idle lifetime of a stored session
    #[arg(
        long,
        env = "SESSION_TTL_SECS",
        default_value_t = 24 * 60 * 60,
        value_parser = clap::value_parser!(u64).range(1..=MAX_TTL_SECONDS)
    )]
    pub session_ttl_secs: u64,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,
}

impl ServerConfig {
    pub fn oidc_config(&self) -> Result<OidcConfig> {
        let algorithm: SigningAlgorithm = self
            .id_token_signing_alg
            .parse()
            .context("OIDC_ID_TOKEN_SIGNING_ALG is invalid")?;

        let config = OidcConfig::new(
            self.issuer_url.as_str(),
            self.client_id.as_str(),
            self.client_secret.as_str(),
            &self.redirect_uri,
        )
        .context("OIDC client configuration is invalid")?
        .with_signing_algorithm(algorithm)
        .with_http_timeout(self.http_timeout_secs);

        Ok(config)
    }
}

/// How the session id travels to the browser.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
}

impl CookieSettings {
    /// Secure cookies whenever the callback itself is served over HTTPS.
    pub fn for_config(name: impl Into<String>, oidc: &OidcConfig) -> Self {
        Self {
            name: name.into(),
            secure: oidc.redirect_uri.scheme() == "https",
        }
    }

    pub fn session_cookie(&self, id: &SessionId) -> Cookie<'static> {
        Cookie::build((self.name.clone(), id.as_str().to_owned()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            secure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        let mut argv = vec![
            "ras-oidc-server",
            "--issuer-url",
            "https://access.line.me",
            "--client-id",
            "client",
            "--client-secret",
            "secret",
            "--redirect-uri",
            "https://app.example.com/cb",
        ];
        argv.extend_from_slice(args);
        ServerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.session_cookie_name, "SESSION");
        assert_eq!(config.http_timeout_secs, 10);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");

        let oidc = config.oidc_config().unwrap();
        assert_eq!(oidc.signing_algorithm, SigningAlgorithm::default());
        assert_eq!(oidc.callback_path(), "/cb");
    }

    #[test]
    fn test_session_ttl_range() {
        assert_eq!(
            parse(&["--session-ttl-secs", "3600"]).session_ttl_secs,
            3600
        );

        for value in ["0", "18446744073709551615", "9223372036854775807"] {
            let result = ServerConfig::try_parse_from([
                "ras-oidc-server",
                "--issuer-url",
                "https://access.line.me",
                "--client-id",
                "client",
                "--client-secret",
                "secret",
                "--redirect-uri",
                "https://app.example.com/cb",
                "--session-ttl-secs",
                value,
            ]);
            assert!(result.is_err(), "{value} should be rejected");
        }
    }

    #[test]
    fn test_invalid_algorithm_is_rejected() {
        let config = parse(&["--id-token-signing-alg", "none"]);
        assert!(config.oidc_config().is_err());
    }

    #[test]
    fn test_empty_client_secret_is_rejected() {
        let mut config = parse(&[]);
        config.client_secret = String::new();
        assert!(config.oidc_config().is_err());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let oidc = parse(&[]).oidc_config().unwrap();
        let settings = CookieSettings::for_config("SESSION", &oidc);
        let cookie = settings.session_cookie(&SessionId::from("abc"));

        assert_eq!(cookie.name(), "SESSION");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }
}
