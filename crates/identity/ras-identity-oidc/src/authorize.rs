//! Authorization requests: the first leg of a login.

use crate::client::OidcClient;
use crate::discovery::ProviderDirectory;
use crate::error::OidcResult;
use crate::session::{FlowArtifacts, PendingLogin};
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

/// A login ready to be stored in the session before redirecting the browser.
#[derive(Debug, Clone)]
pub struct PreparedLogin {
    pub login: PendingLogin,
    pub authorization_url: String,
}

pub struct AuthorizationRequestBuilder {
    client: Arc<OidcClient>,
    directory: Arc<ProviderDirectory>,
    pending_login_ttl: Duration,
}

impl AuthorizationRequestBuilder {
    pub fn new(
        client: Arc<OidcClient>,
        directory: Arc<ProviderDirectory>,
        pending_login_ttl: Duration,
    ) -> Self {
        Self {
            client,
            directory,
            pending_login_ttl,
        }
    }

    /// Generate fresh artifacts and the provider URL that carries them.
    ///
    /// Fails only when provider discovery fails.
    pub async fn prepare(&self, original_url: String) -> OidcResult<PreparedLogin> {
        let metadata = self.directory.metadata().await?;
        let artifacts = FlowArtifacts::generate();
        let authorization_url = self.client.authorization_url(&metadata, &artifacts)?;

        info!("Starting OIDC login for {}", original_url);
        Ok(PreparedLogin {
            login: PendingLogin::new(artifacts, original_url, self.pending_login_ttl),
            authorization_url,
        })
    }
}
