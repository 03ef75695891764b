//! Provider discovery with a time-bounded cache.

use crate::error::{OidcError, OidcResult};
use crate::types::ProviderMetadata;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: Arc<ProviderMetadata>,
    fetched_at: DateTime<Utc>,
}

/// Resolves the issuer's metadata and keeps it for `ttl`.
///
/// Readers share the cached value. When it goes stale, concurrent callers may
/// each fetch the document once; the last write wins.
pub struct ProviderDirectory {
    http_client: Client,
    discovery_url: String,
    ttl: Duration,
    cache: RwLock<Option<CachedMetadata>>,
}

impl ProviderDirectory {
    pub fn new(http_client: Client, discovery_url: String, ttl: Duration) -> Self {
        Self {
            http_client,
            discovery_url,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// Cached metadata, fetching it again once older than the TTL.
    pub async fn metadata(&self) -> OidcResult<Arc<ProviderMetadata>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if Utc::now() - cached.fetched_at < self.ttl {
                debug!("Using cached provider metadata");
                return Ok(cached.metadata.clone());
            }
        }

        let metadata = Arc::new(self.discover().await?);
        *self.cache.write().await = Some(CachedMetadata {
            metadata: metadata.clone(),
            fetched_at: Utc::now(),
        });

        Ok(metadata)
    }

    /// Drop the cached document so the next call fetches it again.
    pub async fn invalidate(&self) {
        self.cache.write().await.take();
    }

    /// Fetch and check the well-known configuration document.
    pub async fn discover(&self) -> OidcResult<ProviderMetadata> {
        if !self.discovery_url.starts_with("https://") {
            warn!(
                "Discovery document is not fetched over HTTPS: {}",
                self.discovery_url
            );
        }

        let response = self
            .http_client
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| OidcError::Discovery(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::Discovery(format!(
                "{} answered with HTTP {status}",
                self.discovery_url
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| OidcError::Discovery(format!("malformed discovery document: {e}")))?;

        validate_metadata(&metadata)?;

        info!(
            "Discovered OIDC provider {}",
            metadata.issuer.as_deref().unwrap_or(&self.discovery_url)
        );
        Ok(metadata)
    }
}

fn validate_metadata(metadata: &ProviderMetadata) -> OidcResult<()> {
    for (name, endpoint) in [
        ("authorization_endpoint", &metadata.authorization_endpoint),
        ("token_endpoint", &metadata.token_endpoint),
    ] {
        Url::parse(endpoint)
            .map_err(|e| OidcError::Discovery(format!("{name} '{endpoint}' is invalid: {e}")))?;
    }

    if !metadata.supports_response_type_code() {
        return Err(OidcError::Discovery(
            "provider does not support response_type=code".to_string(),
        ));
    }

    if !metadata.supports_pkce_s256() {
        warn!("Provider does not advertise S256 PKCE; the code challenge may be ignored");
    }

    Ok(())
}
