//! Callback validation: the second leg of a login.

use crate::client::OidcClient;
use crate::error::{OidcError, OidcResult};
use crate::session::FlowArtifacts;
use crate::types::{CallbackParams, ProviderMetadata, TokenSet};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CallbackValidator {
    client: Arc<OidcClient>,
}

impl CallbackValidator {
    pub fn new(client: Arc<OidcClient>) -> Self {
        Self { client }
    }

    /// Run the callback checks in order, stopping at the first failure:
    /// state, provider error, code presence, token exchange, ID token, nonce.
    ///
    /// `metadata` is resolved by the caller before the artifacts are taken
    /// from the session, so a discovery outage never spends them.
    pub async fn validate(
        &self,
        metadata: &ProviderMetadata,
        artifacts: &FlowArtifacts,
        params: &CallbackParams,
    ) -> OidcResult<TokenSet> {
        if params.state.as_deref() != Some(artifacts.state.as_str()) {
            warn!("Callback state does not match the pending login");
            return Err(OidcError::StateMismatch);
        }

        if let Some(error) = &params.error {
            let description = params
                .error_description
                .clone()
                .unwrap_or_else(|| "No description".to_string());
            warn!("Provider returned an error on callback: {}: {}", error, description);
            return Err(OidcError::ProviderError {
                error: error.clone(),
                description,
            });
        }

        let code = params
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or(OidcError::MissingAuthorizationCode)?;

        let response = self
            .client
            .exchange_code(metadata, code, &artifacts.code_verifier)
            .await?;
        let id_token = response
            .id_token
            .ok_or_else(|| OidcError::TokenExchange("token response has no id_token".to_string()))?;

        let claims = self.client.verify_id_token(metadata, &id_token).await?;

        if claims.nonce.as_deref() != Some(artifacts.nonce.as_str()) {
            warn!("ID token nonce does not match the pending login");
            return Err(OidcError::NonceMismatch);
        }

        info!("Validated OIDC callback for subject {}", claims.sub);
        Ok(TokenSet {
            access_token: response.access_token,
            token_type: response.token_type,
            id_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            scope: response.scope,
            claims,
            obtained_at: Utc::now(),
        })
    }
}
