//! OIDC relying-party client: authorization URLs, code exchange, and ID token checks.

use crate::config::{OidcConfig, SigningAlgorithm};
use crate::error::{OidcError, OidcResult};
use crate::pkce::PkceChallenge;
use crate::session::FlowArtifacts;
use crate::types::{IdTokenClaims, ProviderMetadata, TokenResponse};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::Client;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Clock skew tolerated on `exp`, in seconds.
const LEEWAY_SECONDS: u64 = 60;

/// A relying party bound to one client registration.
///
/// Only the `authorization_code` grant with `response_type=code` is used.
#[derive(Clone)]
pub struct OidcClient {
    http_client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    signing_algorithm: SigningAlgorithm,
    fallback_issuer: String,
}

impl OidcClient {
    pub fn new(config: &OidcConfig) -> OidcResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| OidcError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_http_client(config, http_client))
    }

    pub fn with_http_client(config: &OidcConfig, http_client: Client) -> Self {
        Self {
            http_client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.to_string(),
            scopes: config.scopes.clone(),
            signing_algorithm: config.signing_algorithm,
            fallback_issuer: config.expected_issuer().to_string(),
        }
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Authorization endpoint URL carrying the artifacts of one login attempt.
    pub fn authorization_url(
        &self,
        metadata: &ProviderMetadata,
        artifacts: &FlowArtifacts,
    ) -> OidcResult<String> {
        let mut url = Url::parse(&metadata.authorization_endpoint)
            .map_err(|e| OidcError::Discovery(format!("invalid authorization endpoint: {e}")))?;
        let pkce = PkceChallenge::from_verifier(artifacts.code_verifier.clone());

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &artifacts.state)
            .append_pair("nonce", &artifacts.nonce)
            .append_pair("code_challenge", &pkce.code_challenge)
            .append_pair("code_challenge_method", pkce.code_challenge_method);

        Ok(url.to_string())
    }

    /// Exchange authorization code for tokens
    pub async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        code: &str,
        code_verifier: &str,
    ) -> OidcResult<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", self.redirect_uri.as_str());
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());
        params.insert("code_verifier", code_verifier);

        let response = self
            .http_client
            .post(&metadata.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| OidcError::TokenExchange(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Token exchange failed with HTTP {}: {}", status, error_text);
            return Err(OidcError::TokenExchange(format!("HTTP {status}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| OidcError::TokenExchange(format!("invalid token response: {e}")))?;

        if token_response.id_token.is_none() {
            return Err(OidcError::TokenExchange(
                "token response has no id_token".to_string(),
            ));
        }

        info!("Successfully exchanged code for tokens");
        Ok(token_response)
    }

    /// Check signature, `exp`, `iss` and `aud` of an ID token.
    ///
    /// The nonce is left to the caller, which holds the expected value.
    pub async fn verify_id_token(
        &self,
        metadata: &ProviderMetadata,
        id_token: &str,
    ) -> OidcResult<IdTokenClaims> {
        let algorithm = self.resolve_algorithm(metadata)?;
        let key = self.decoding_key(metadata, algorithm, id_token).await?;

        let issuer = metadata.issuer.as_deref().unwrap_or(&self.fallback_issuer);
        let mut validation = Validation::new(algorithm);
        validation.leeway = LEEWAY_SECONDS;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let token_data = decode::<IdTokenClaims>(id_token, &key, &validation)?;
        debug!("Verified ID token for subject {}", token_data.claims.sub);
        Ok(token_data.claims)
    }

    fn resolve_algorithm(&self, metadata: &ProviderMetadata) -> OidcResult<Algorithm> {
        let advertised = metadata
            .id_token_signing_alg_values_supported
            .as_deref()
            .unwrap_or_default();

        match self.signing_algorithm {
            SigningAlgorithm::Pinned(algorithm) => {
                let listed = advertised
                    .iter()
                    .any(|name| Algorithm::from_str(name).ok() == Some(algorithm));
                if !advertised.is_empty() && !listed {
                    warn!(
                        "ID token algorithm {:?} is pinned but the provider advertises {:?}",
                        algorithm, advertised
                    );
                }
                Ok(algorithm)
            }
            SigningAlgorithm::Advertised => advertised
                .iter()
                .find_map(|name| Algorithm::from_str(name).ok())
                .or(advertised.is_empty().then_some(Algorithm::RS256))
                .ok_or_else(|| {
                    OidcError::TokenValidation(format!(
                        "no supported ID token algorithm among {advertised:?}"
                    ))
                }),
        }
    }

    async fn decoding_key(
        &self,
        metadata: &ProviderMetadata,
        algorithm: Algorithm,
        id_token: &str,
    ) -> OidcResult<DecodingKey> {
        if is_hmac(algorithm) {
            // Symmetric ID tokens are signed with the client secret.
            return Ok(DecodingKey::from_secret(self.client_secret.as_bytes()));
        }

        let jwks_uri = metadata.jwks_uri.as_deref().ok_or_else(|| {
            OidcError::TokenValidation("provider does not publish a jwks_uri".to_string())
        })?;
        let kid = decode_header(id_token)?.kid;

        let jwks: JwkSet = self
            .http_client
            .get(jwks_uri)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| OidcError::TokenValidation(format!("failed to fetch JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| OidcError::TokenValidation(format!("invalid JWKS: {e}")))?;

        let jwk = match kid.as_deref() {
            Some(kid) => jwks.find(kid),
            None if jwks.keys.len() == 1 => jwks.keys.first(),
            None => None,
        }
        .ok_or_else(|| {
            OidcError::TokenValidation(format!("no signing key for kid {kid:?}"))
        })?;

        Ok(DecodingKey::from_jwk(jwk)?)
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}
